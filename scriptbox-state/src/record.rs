//! Persisted variable records and operator-name mangling

use crate::error::{StateError, StateResult};

/// Version written for every value record
pub const VALUE_VERSION: i32 = 2;

/// Method stored as a function expression, evaluated as `(<data>)`
pub const METHOD_EXPRESSION_VERSION: i32 = 1;

/// Method stored as a named declaration, evaluated followed by its name
pub const METHOD_DECLARATION_VERSION: i32 = 2;

/// What a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VariableKind {
    Value = 0,
    Method = 1,
}

impl VariableKind {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i64> for VariableKind {
    type Error = StateError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(VariableKind::Value),
            1 => Ok(VariableKind::Method),
            other => Err(StateError::storage(format!("unknown variable kind {}", other))),
        }
    }
}

/// One row of the variables table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord {
    pub name: String,
    pub kind: VariableKind,
    pub data: String,
    pub version: i32,
}

impl VariableRecord {
    /// A serialized value
    pub fn value(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Value,
            data: data.into(),
            version: VALUE_VERSION,
        }
    }

    /// Method source code
    pub fn method(name: impl Into<String>, code: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Method,
            data: code.into(),
            version,
        }
    }

    pub fn is_method(&self) -> bool {
        self.kind == VariableKind::Method
    }
}

const OPERATOR_NAMES: &[(char, &str)] = &[
    ('.', "Dot"),
    ('=', "Equals"),
    ('+', "Plus"),
    ('-', "Minus"),
    ('*', "Asterisk"),
    ('/', "Slash"),
    ('%', "Percent"),
    ('&', "Ampersand"),
    ('|', "Pipe"),
    ('^', "Caret"),
    ('~', "Tilde"),
    ('<', "LeftAngle"),
    ('>', "RightAngle"),
    ('!', "Bang"),
    ('?', "Question"),
    ('@', "At"),
    ('#', "Hash"),
    ('$', "Dollar"),
    ('\\', "Backslash"),
];

/// Whether `name` is stored under its own key
pub fn is_identifier(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Storage key for an operator such as `<>` (`op_LeftAngleRightAngle`)
pub fn operator_key(op: &str) -> StateResult<String> {
    if op.is_empty() {
        return Err(StateError::InvalidOperator(op.to_string()));
    }

    let mut key = String::from("op_");
    for ch in op.chars() {
        let (_, name) = OPERATOR_NAMES
            .iter()
            .find(|(c, _)| *c == ch)
            .ok_or_else(|| StateError::InvalidOperator(op.to_string()))?;
        key.push_str(name);
    }
    Ok(key)
}

/// Storage key for any method name
pub fn storage_key(name: &str) -> StateResult<String> {
    if is_identifier(name) {
        Ok(name.to_string())
    } else {
        operator_key(name)
    }
}
