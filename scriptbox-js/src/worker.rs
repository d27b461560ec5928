//! Worker side of the pool protocol

use std::sync::Arc;

use scriptbox_ipc::{
    FramedTransport, Handshake, HandshakeAck, IpcError, IpcTransport, JobRequest,
};
use tracing::{debug, info};

use crate::error::HostResult;
use crate::host::ScriptHost;

/// Register with the pool listening on `port`, then serve jobs until the
/// pool closes the connection
pub async fn run_worker(port: u16, host: Arc<ScriptHost>) -> HostResult<()> {
    let pid = std::process::id();
    let mut transport = FramedTransport::connect(("127.0.0.1", port)).await?;

    transport.send(&Handshake { pid: pid as i32 }).await?;
    transport.receive::<HandshakeAck>().await?.into_result()?;
    info!(pid, port, "Registered with pool");

    {
        let host = host.clone();
        tokio::task::spawn_blocking(move || host.warm_up()).await?;
    }

    loop {
        let request = match transport.receive::<JobRequest>().await {
            Ok(request) => request,
            Err(IpcError::ConnectionClosed) => {
                info!(pid, "Pool closed the connection, exiting");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        debug!(service = %request.service, user = %request.user_id, "Running job");
        let host = host.clone();
        let response = tokio::task::spawn_blocking(move || host.run(&request)).await?;
        transport.send(&response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostConfig;
    use scriptbox_ipc::JobResponse;
    use scriptbox_state::MemoryVariableStore;
    use tokio::net::TcpListener;

    fn request(source: &str) -> JobRequest {
        JobRequest {
            service: "test".to_string(),
            user_id: "1".to_string(),
            user_name: "tester".to_string(),
            source: source.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_registers_serves_and_exits_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let host = Arc::new(ScriptHost::new(
            Arc::new(MemoryVariableStore::new()),
            HostConfig::default(),
        ));
        let worker = tokio::spawn(run_worker(port, host));

        let (stream, _) = listener.accept().await.unwrap();
        let mut pool_side = FramedTransport::new(stream);

        let hello: Handshake = pool_side.receive().await.unwrap();
        assert_eq!(hello.pid, std::process::id() as i32);
        pool_side.send(&HandshakeAck::accepted()).await.unwrap();

        pool_side.send(&request("6 * 7")).await.unwrap();
        let response: JobResponse = pool_side.receive().await.unwrap();
        assert_eq!(response.output, "42");
        assert_eq!(response.image, None);

        drop(pool_side);
        worker.await.unwrap().unwrap();
    }
}
