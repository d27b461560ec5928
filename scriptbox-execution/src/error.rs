//! Error types for job execution

use std::time::Duration;

use scriptbox_ipc::IpcError;
use scriptbox_state::StateError;
use thiserror::Error;

/// Job execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Program too long: {length} characters (limit {limit})")]
    ProgramTooLong { length: usize, limit: usize },

    #[error("Worker did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("Host process died: {0}")]
    HostProcessDied(String),

    #[error("Process pool disposed")]
    PoolDisposed,

    #[error("Invalid caller identity: {0}")]
    InvalidIdentity(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("{0} failed")]
    LimiterFailed(String),

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Storage error: {0}")]
    Storage(#[from] StateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl ExecutionError {
    /// Failures the pool classifies itself; the offending worker is retired
    /// and the caller only sees [`ExecutionError::reason`]
    pub fn is_classified(&self) -> bool {
        matches!(
            self,
            ExecutionError::ProgramTooLong { .. }
                | ExecutionError::TimedOut(_)
                | ExecutionError::HostProcessDied(_)
                | ExecutionError::PoolDisposed
        )
    }

    /// Short reason shown to callers for classified failures
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            ExecutionError::ProgramTooLong { .. } => Some("Program Too Long"),
            ExecutionError::TimedOut(_) => Some("Timed Out"),
            ExecutionError::HostProcessDied(_) => Some("Host Process Died"),
            ExecutionError::PoolDisposed => Some("Disposed"),
            _ => None,
        }
    }

    /// Render the error the way callers see it
    pub fn user_message(&self) -> String {
        match self.reason() {
            Some(reason) => format!("ERROR: {}", reason),
            None => format!("EXCEPTION: {}", self),
        }
    }
}

impl From<tokio::task::JoinError> for ExecutionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
