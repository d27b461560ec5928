//! Publishing named functions as stored methods

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scriptbox_state::{
    is_identifier, operator_key, VariableRecord, VariableStore, METHOD_DECLARATION_VERSION,
    METHOD_EXPRESSION_VERSION,
};
use tracing::info;

use crate::dispatcher::{ExecutionDispatcher, Identity, RunOutcome};
use crate::error::{ExecutionError, ExecutionResult};

pub const METHOD_UPDATED: &str = "Successfully updated method!";
pub const NOT_A_METHOD: &str = "Code must evaluate to a method!";

/// `function name(`, optionally `async` or a generator; captures the name
const DECLARATION_PATTERN: &str = r"^(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*\(";

/// `None` if the pattern fails to compile
static DECLARATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(DECLARATION_PATTERN).ok());

/// Something that can run a script and report its output
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, identity: &Identity, source: &str) -> Option<RunOutcome>;
}

#[async_trait]
impl ScriptRunner for ExecutionDispatcher {
    async fn run(&self, identity: &Identity, source: &str) -> Option<RunOutcome> {
        ExecutionDispatcher::run(self, identity, source).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { key: String, version: i32 },
    /// The verification run did not produce a function; carries the text to
    /// show the caller
    Rejected(String),
}

impl PublishOutcome {
    pub fn message(&self) -> &str {
        match self {
            PublishOutcome::Published { .. } => METHOD_UPDATED,
            PublishOutcome::Rejected(message) => message,
        }
    }
}

pub struct MethodPublisher {
    runner: Arc<dyn ScriptRunner>,
    store: Arc<dyn VariableStore>,
}

impl MethodPublisher {
    pub fn new(runner: Arc<dyn ScriptRunner>, store: Arc<dyn VariableStore>) -> Self {
        Self { runner, store }
    }

    /// Verify `code` evaluates to a function and store it as a method
    ///
    /// Without an explicit `name`, the code must start with a named function
    /// declaration. Operator names (`+`, `<>`, ...) take a function
    /// expression instead and are stored under their mangled key.
    pub async fn publish(
        &self,
        identity: &Identity,
        name: Option<&str>,
        code: &str,
    ) -> ExecutionResult<PublishOutcome> {
        let code = clean_code(code);
        if code.is_empty() {
            return Err(ExecutionError::InvalidMethod("no code given".to_string()));
        }

        let name = match name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => declared_name(&code).ok_or_else(|| {
                ExecutionError::InvalidMethod(
                    "expected a named function declaration".to_string(),
                )
            })?,
        };

        let (key, version, check) = if is_identifier(&name) {
            let check = format!("{}\n;{}", code, name);
            (name.clone(), METHOD_DECLARATION_VERSION, check)
        } else {
            let key = operator_key(&name)
                .map_err(|e| ExecutionError::InvalidMethod(e.to_string()))?;
            (key, METHOD_EXPRESSION_VERSION, format!("({})", code))
        };

        let output = self
            .runner
            .run(identity, &check)
            .await
            .map(|outcome| outcome.output)
            .unwrap_or_default();
        let output = output.trim();

        if output.starts_with("ERROR:") || output.starts_with("EXCEPTION:") {
            return Ok(PublishOutcome::Rejected(output.to_string()));
        }
        if output.lines().last().map(str::trim) != Some("function") {
            return Ok(PublishOutcome::Rejected(NOT_A_METHOD.to_string()));
        }

        let store = self.store.clone();
        let record = VariableRecord::method(key.clone(), code, version);
        tokio::task::spawn_blocking(move || {
            let mut tx = store.begin()?;
            tx.upsert(&record)?;
            tx.commit()
        })
        .await??;

        info!(method = %key, version, "Published method");
        Ok(PublishOutcome::Published { key, version })
    }
}

fn clean_code(code: &str) -> String {
    code.replace("\r\n", "\n")
        .replace('\r', "\n")
        .trim()
        .trim_matches('`')
        .trim()
        .to_string()
}

fn declared_name(code: &str) -> Option<String> {
    DECLARATION
        .as_ref()?
        .captures(code)
        .and_then(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use scriptbox_state::{MemoryVariableStore, VariableKind};

    struct ScriptedRunner {
        output: String,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn answering(output: &str) -> Arc<Self> {
            Arc::new(Self {
                output: output.to_string(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ScriptRunner for ScriptedRunner {
        async fn run(&self, _identity: &Identity, source: &str) -> Option<RunOutcome> {
            self.seen.lock().push(source.to_string());
            Some(RunOutcome::message(self.output.clone()))
        }
    }

    fn identity() -> Identity {
        Identity::new("test", "1", "tester")
    }

    #[test]
    fn test_declaration_pattern_compiles() {
        assert!(Regex::new(DECLARATION_PATTERN).is_ok());
        assert!(DECLARATION.is_some());
    }

    #[test]
    fn test_declared_name() {
        assert_eq!(declared_name("function add(a, b) { return a + b; }").as_deref(), Some("add"));
        assert_eq!(declared_name("async function $fetch ()").as_deref(), Some("$fetch"));
        assert_eq!(declared_name("function* gen() {}").as_deref(), Some("gen"));
        assert_eq!(declared_name("const f = () => 1"), None);
        assert_eq!(declared_name("function (a) {}"), None);
    }

    #[test]
    fn test_clean_code() {
        assert_eq!(clean_code("```\r\nfunction f() {}\r\n```"), "function f() {}");
        assert_eq!(clean_code("  `x`  "), "x");
    }

    #[tokio::test]
    async fn test_publishes_declaration() {
        let runner = ScriptedRunner::answering("function");
        let store = MemoryVariableStore::new();
        let publisher = MethodPublisher::new(runner.clone(), Arc::new(store.clone()));

        let outcome = publisher
            .publish(&identity(), None, "`function double(x) { return x * 2; }`")
            .await
            .unwrap();

        assert_eq!(outcome.message(), METHOD_UPDATED);
        assert_eq!(
            runner.seen.lock().as_slice(),
            ["function double(x) { return x * 2; }\n;double"]
        );

        let record = store.get("double").unwrap();
        assert_eq!(record.kind, VariableKind::Method);
        assert_eq!(record.version, METHOD_DECLARATION_VERSION);
        assert_eq!(record.data, "function double(x) { return x * 2; }");
    }

    #[tokio::test]
    async fn test_publishes_operator_under_mangled_key() {
        let runner = ScriptedRunner::answering("function");
        let store = MemoryVariableStore::new();
        let publisher = MethodPublisher::new(runner.clone(), Arc::new(store.clone()));

        let outcome = publisher
            .publish(&identity(), Some("<>"), "(a, b) => a != b")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Published {
                key: "op_LeftAngleRightAngle".to_string(),
                version: METHOD_EXPRESSION_VERSION,
            }
        );
        assert_eq!(runner.seen.lock().as_slice(), ["((a, b) => a != b)"]);
        assert!(store.get("op_LeftAngleRightAngle").unwrap().is_method());
    }

    #[tokio::test]
    async fn test_script_error_is_returned_verbatim() {
        let runner = ScriptedRunner::answering("EXCEPTION: SyntaxError: unexpected token\n");
        let store = MemoryVariableStore::new();
        let publisher = MethodPublisher::new(runner, Arc::new(store.clone()));

        let outcome = publisher
            .publish(&identity(), None, "function broken( {")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Rejected("EXCEPTION: SyntaxError: unexpected token".to_string())
        );
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_non_function_is_rejected() {
        let runner = ScriptedRunner::answering("42");
        let store = MemoryVariableStore::new();
        let publisher = MethodPublisher::new(runner, Arc::new(store.clone()));

        let outcome = publisher
            .publish(&identity(), Some("answer"), "var answer = 42")
            .await
            .unwrap();

        assert_eq!(outcome.message(), NOT_A_METHOD);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_name_and_bad_operator() {
        let publisher = MethodPublisher::new(
            ScriptedRunner::answering("function"),
            Arc::new(MemoryVariableStore::new()),
        );

        let err = publisher
            .publish(&identity(), None, "(x) => x")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidMethod(_)));

        let err = publisher
            .publish(&identity(), Some("+:"), "(a, b) => a")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidMethod(_)));

        let err = publisher.publish(&identity(), None, "``").await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidMethod(_)));
    }
}
