//! IPC error types

use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Connection closed by the other end
    #[error("Connection closed")]
    ConnectionClosed,

    /// Timeout waiting for the other end
    #[error("Timeout waiting for response")]
    Timeout,

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// The pool answered the handshake with something other than the ack
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),
}

impl IpcError {
    /// Check if this error means the peer or the connection is gone
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, IpcError::IoError(_) | IpcError::ConnectionClosed)
    }

    /// Check if this error indicates a malformed peer
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::InvalidMessage(_) | IpcError::HandshakeRejected(_)
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => IpcError::ConnectionClosed,
            std::io::ErrorKind::TimedOut => IpcError::Timeout,
            _ => IpcError::IoError(err.to_string()),
        }
    }
}
