//! Inter-process communication for scriptbox
//!
//! This crate provides the wire protocol spoken between the process pool and
//! its worker processes: a registration handshake, a job request and a job
//! response, all built from 4-byte length-prefixed fields.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    Handshake, HandshakeAck, JobRequest, JobResponse, WireMessage, HANDSHAKE_ACK, MAX_FRAME_LEN,
};
pub use transport::{FramedTransport, IpcTransport};
