//! Message types exchanged between the pool and a worker

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::AsyncRead;

use crate::codec::{put_bytes, put_i32, put_string, read_bytes, read_i32, read_string};
use crate::error::IpcError;

/// Acknowledgement string the pool sends once a worker is registered
pub const HANDSHAKE_ACK: &str = "OK";

/// Upper bound for any single length-prefixed field (16 MiB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A message that can travel over the wire
///
/// Encoding is synchronous into a buffer so a whole message is written in one
/// go; decoding reads field by field from the stream.
#[async_trait]
pub trait WireMessage: Sized + Send + Sync {
    /// Append the encoded message to `buf`
    fn encode(&self, buf: &mut BytesMut);

    /// Read one message from `reader`
    async fn decode<R>(reader: &mut R) -> Result<Self, IpcError>
    where
        R: AsyncRead + Unpin + Send;
}

/// Worker -> pool: registration with the worker's OS process id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub pid: i32,
}

#[async_trait]
impl WireMessage for Handshake {
    fn encode(&self, buf: &mut BytesMut) {
        put_i32(buf, self.pid);
    }

    async fn decode<R>(reader: &mut R) -> Result<Self, IpcError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let pid = read_i32(reader).await?;
        if pid <= 0 {
            return Err(IpcError::InvalidMessage(format!("invalid worker pid {}", pid)));
        }
        Ok(Self { pid })
    }
}

/// Pool -> worker: reply to a [`Handshake`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeAck {
    pub status: String,
}

impl HandshakeAck {
    /// The acknowledgement that accepts a registration
    pub fn accepted() -> Self {
        Self {
            status: HANDSHAKE_ACK.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == HANDSHAKE_ACK
    }

    /// Turn anything but the accepting ack into an error
    pub fn into_result(self) -> Result<(), IpcError> {
        if self.is_accepted() {
            Ok(())
        } else {
            Err(IpcError::HandshakeRejected(self.status))
        }
    }
}

#[async_trait]
impl WireMessage for HandshakeAck {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.status);
    }

    async fn decode<R>(reader: &mut R) -> Result<Self, IpcError>
    where
        R: AsyncRead + Unpin + Send,
    {
        Ok(Self {
            status: read_string(reader).await?,
        })
    }
}

/// Pool -> worker: one job to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub service: String,
    pub user_id: String,
    pub user_name: String,
    pub source: String,
}

#[async_trait]
impl WireMessage for JobRequest {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.service);
        put_string(buf, &self.user_id);
        put_string(buf, &self.user_name);
        put_string(buf, &self.source);
    }

    async fn decode<R>(reader: &mut R) -> Result<Self, IpcError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let service = read_string(reader).await?;
        let user_id = read_string(reader).await?;
        let user_name = read_string(reader).await?;
        let source = read_string(reader).await?;

        Ok(Self {
            service,
            user_id,
            user_name,
            source,
        })
    }
}

/// Worker -> pool: the result of a job
///
/// A zero-length image on the wire means no image was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobResponse {
    pub output: String,
    pub image: Option<Vec<u8>>,
}

impl JobResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            image: None,
        }
    }
}

#[async_trait]
impl WireMessage for JobResponse {
    fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, &self.output);
        put_bytes(buf, self.image.as_deref().unwrap_or_default());
    }

    async fn decode<R>(reader: &mut R) -> Result<Self, IpcError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let output = read_string(reader).await?;
        let image = read_bytes(reader).await?;

        Ok(Self {
            output,
            image: (!image.is_empty()).then_some(image),
        })
    }
}
