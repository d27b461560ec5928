//! IPC transport implementations

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::error::IpcError;
use crate::protocol::WireMessage;

/// IPC transport trait for the pool <-> worker byte stream
#[async_trait]
pub trait IpcTransport: Send {
    /// Send one message to the other end
    async fn send<M: WireMessage>(&mut self, message: &M) -> Result<(), IpcError>;

    /// Receive one message from the other end
    async fn receive<M: WireMessage>(&mut self) -> Result<M, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Transport over any bidirectional byte stream
///
/// Each message is encoded into one buffer and written with a single
/// `write_all`, so a peer never observes half a message followed by a stall
/// on our side.
pub struct FramedTransport<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    buf: BytesMut,
}

impl<S> FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read),
            writer: write,
            buf: BytesMut::with_capacity(1024),
        }
    }
}

impl FramedTransport<TcpStream> {
    /// Connect to a listening pool
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> Result<Self, IpcError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl<S> IpcTransport for FramedTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send<M: WireMessage>(&mut self, message: &M) -> Result<(), IpcError> {
        self.buf.clear();
        message.encode(&mut self.buf);

        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;

        tracing::trace!(bytes = self.buf.len(), "sent message");
        Ok(())
    }

    async fn receive<M: WireMessage>(&mut self) -> Result<M, IpcError> {
        M::decode(&mut self.reader).await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Handshake, HandshakeAck, JobRequest, JobResponse};

    #[tokio::test]
    async fn test_full_exchange_over_duplex() {
        let (pool_side, worker_side) = tokio::io::duplex(4096);
        let mut pool = FramedTransport::new(pool_side);
        let mut worker = FramedTransport::new(worker_side);

        worker.send(&Handshake { pid: 77 }).await.unwrap();
        let hello: Handshake = pool.receive().await.unwrap();
        assert_eq!(hello.pid, 77);

        pool.send(&HandshakeAck::accepted()).await.unwrap();
        let ack: HandshakeAck = worker.receive().await.unwrap();
        assert!(ack.is_accepted());

        let request = JobRequest {
            service: "test".to_string(),
            user_id: "1".to_string(),
            user_name: "tester".to_string(),
            source: "1+1".to_string(),
        };
        pool.send(&request).await.unwrap();
        let received: JobRequest = worker.receive().await.unwrap();
        assert_eq!(received, request);

        worker.send(&JobResponse::text("2")).await.unwrap();
        let response: JobResponse = pool.receive().await.unwrap();
        assert_eq!(response.output, "2");
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (pool_side, worker_side) = tokio::io::duplex(64);
        let mut pool = FramedTransport::new(pool_side);
        drop(worker_side);

        let err = pool.receive::<JobResponse>().await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));
        assert!(err.is_transport_failure());
    }

    #[tokio::test]
    async fn test_close_ends_the_peer_stream() {
        let (pool_side, worker_side) = tokio::io::duplex(64);
        let mut pool = FramedTransport::new(pool_side);
        let mut worker = FramedTransport::new(worker_side);

        pool.close().await.unwrap();

        let err = worker.receive::<HandshakeAck>().await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_large_message_crosses_small_buffer() {
        let (pool_side, worker_side) = tokio::io::duplex(16);
        let mut pool = FramedTransport::new(pool_side);
        let mut worker = FramedTransport::new(worker_side);

        let output = "x".repeat(10_000);
        let expected = output.clone();
        let sender = tokio::spawn(async move {
            worker.send(&JobResponse::text(output)).await.unwrap();
            worker
        });

        let response: JobResponse = pool.receive().await.unwrap();
        assert_eq!(response.output, expected);
        sender.await.unwrap();
    }
}
