//! Bounded script output

/// Text buffer that silently stops accepting input at its limits
#[derive(Debug, Clone)]
pub struct LimitedOutput {
    text: String,
    chars: usize,
    lines: usize,
    max_chars: usize,
    max_lines: usize,
    truncated: bool,
}

impl LimitedOutput {
    pub fn new(max_chars: usize, max_lines: usize) -> Self {
        Self {
            text: String::new(),
            chars: 0,
            lines: 0,
            max_chars,
            max_lines,
            truncated: false,
        }
    }

    pub fn write(&mut self, text: &str) {
        for ch in text.chars() {
            if self.chars >= self.max_chars || self.lines >= self.max_lines {
                self.truncated = true;
                return;
            }
            if ch == '\n' {
                self.lines += 1;
            }
            self.text.push(ch);
            self.chars += 1;
        }
    }

    pub fn write_line(&mut self, text: &str) {
        self.write(text);
        self.write("\n");
    }

    /// Whether anything was dropped
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Everything written so far, without trailing newlines
    pub fn text(&self) -> &str {
        self.text.trim_end_matches('\n')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_newlines_trimmed() {
        let mut output = LimitedOutput::new(100, 10);
        output.write_line("a");
        output.write_line("b");
        assert_eq!(output.text(), "a\nb");
        assert!(!output.is_truncated());
    }

    #[test]
    fn test_char_limit() {
        let mut output = LimitedOutput::new(5, 10);
        output.write("abcdefgh");
        assert_eq!(output.text(), "abcde");
        assert!(output.is_truncated());
    }

    #[test]
    fn test_line_limit() {
        let mut output = LimitedOutput::new(100, 2);
        for line in ["one", "two", "three"] {
            output.write_line(line);
        }
        assert_eq!(output.text(), "one\ntwo");
        assert!(output.is_truncated());
    }
}
