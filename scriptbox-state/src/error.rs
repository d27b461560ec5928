//! State and storage error types

use thiserror::Error;

/// Result type for variable state operations
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised while resolving or persisting script variables
///
/// All of these are visible to the script and end up in its output; none of
/// them retires the worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("Variable '{0}' could not finish loading due to a circular dependency")]
    CircularVariableDependency(String),

    #[error("Variable '{0}' is read-only")]
    ReadOnly(String),

    #[error("Invalid operator '{0}'")]
    InvalidOperator(String),

    /// Name too long, payload too large, serialization or database failure
    #[error("Storage fault: {0}")]
    StorageFault(String),

    /// The interpreter failed while materializing a stored value
    #[error("{0}")]
    Host(String),

    #[error("The variable transaction has already finished")]
    TransactionFinished,
}

impl StateError {
    pub fn storage(message: impl Into<String>) -> Self {
        StateError::StorageFault(message.into())
    }
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        StateError::StorageFault(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::StorageFault(format!("serialization failed: {}", err))
    }
}
