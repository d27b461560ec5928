//! Worker registration endpoint
//!
//! Every launched worker connects back, sends its pid and waits for the
//! acknowledgement. Connections that stall, send garbage or claim a pid this
//! pool did not launch are dropped without retry; the pool's registration
//! deadline takes care of the process itself.

use std::net::SocketAddr;
use std::sync::Weak;

use scriptbox_ipc::{FramedTransport, Handshake, HandshakeAck, IpcError, IpcTransport};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::pool::ProcessPool;

pub(crate) async fn serve(listener: TcpListener, pool: Weak<ProcessPool>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept worker connection");
                continue;
            }
        };

        let Some(pool) = pool.upgrade() else {
            break;
        };

        tokio::spawn(async move {
            if let Err(e) = handshake(&pool, stream, peer).await {
                debug!(%peer, error = %e, "Dropped worker connection");
            }
        });
    }
}

async fn handshake(pool: &ProcessPool, stream: TcpStream, peer: SocketAddr) -> ExecutionResult<()> {
    stream.set_nodelay(true)?;
    let mut transport = FramedTransport::new(stream);
    let deadline = tokio::time::Instant::now() + pool.config().handshake_timeout;

    let hello: Handshake = tokio::time::timeout_at(deadline, transport.receive::<Handshake>())
        .await
        .map_err(|_| IpcError::Timeout)??;
    let pid = hello.pid as u32;

    let Some((id, control)) = pool.wait_for_launch(pid, deadline).await else {
        let _ = transport.close().await;
        return Err(IpcError::HandshakeRejected(format!(
            "pid {} was not launched by this pool",
            pid
        ))
        .into());
    };

    transport.send(&HandshakeAck::accepted()).await?;

    if !pool.register(id, control.clone(), transport) {
        control.kill();
        return Err(ExecutionError::PoolDisposed);
    }

    info!(pid, %peer, "Worker registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_config, InProcessLauncher};
    use bytes::BytesMut;
    use scriptbox_ipc::WireMessage;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_pid_is_dropped() {
        let mut config = fast_config(0, 1);
        config.handshake_timeout = Duration::from_millis(200);
        let pool = ProcessPool::start(config, InProcessLauncher::new())
            .await
            .unwrap();

        let mut stream = TcpStream::connect(pool.local_addr()).await.unwrap();
        let mut buf = BytesMut::new();
        Handshake { pid: 999_999 }.encode(&mut buf);
        stream.write_all(&buf).await.unwrap();

        let mut reply = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
        assert_eq!(pool.stats().live, 0);
        pool.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_silent_connection_times_out() {
        let mut config = fast_config(0, 1);
        config.handshake_timeout = Duration::from_millis(100);
        let pool = ProcessPool::start(config, InProcessLauncher::new())
            .await
            .unwrap();

        let mut stream = TcpStream::connect(pool.local_addr()).await.unwrap();
        let mut reply = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
        pool.shutdown();
    }
}
