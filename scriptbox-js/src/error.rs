//! Worker host error types

use boa_engine::JsError;
use scriptbox_ipc::IpcError;
use scriptbox_state::StateError;
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Error, Debug)]
pub enum HostError {
    /// Uncaught error from the script, as the interpreter renders it
    #[error("{0}")]
    Script(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

impl From<JsError> for HostError {
    fn from(err: JsError) -> Self {
        HostError::Script(err.to_string())
    }
}

impl From<tokio::task::JoinError> for HostError {
    fn from(err: tokio::task::JoinError) -> Self {
        HostError::TaskFailed(err.to_string())
    }
}
