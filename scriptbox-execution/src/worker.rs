//! A registered worker process and its connection

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use scriptbox_ipc::{FramedTransport, IpcTransport, JobRequest, JobResponse};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::launcher::ProcessControl;

/// A worker handed out by the pool
///
/// Owned by exactly one caller between [`ProcessPool::get`] and
/// [`ProcessPool::enqueue`] or [`WorkerProcess::kill`].
///
/// [`ProcessPool::get`]: crate::pool::ProcessPool::get
/// [`ProcessPool::enqueue`]: crate::pool::ProcessPool::enqueue
pub struct WorkerProcess {
    id: u64,
    control: Arc<dyn ProcessControl>,
    transport: FramedTransport<TcpStream>,
    is_new: bool,
}

impl WorkerProcess {
    pub(crate) fn new(
        id: u64,
        control: Arc<dyn ProcessControl>,
        transport: FramedTransport<TcpStream>,
    ) -> Self {
        Self {
            id,
            control,
            transport,
            is_new: true,
        }
    }

    /// Pool slot id, unique for the pool's lifetime
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.control.pid()
    }

    /// True until the worker has answered its first job
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_dead(&self) -> bool {
        self.control.has_exited()
    }

    pub fn kill(&self) {
        if !self.is_dead() {
            debug!(pid = self.pid(), "Killing worker");
        }
        self.control.kill();
    }

    /// Send one job and wait for its response
    ///
    /// A worker that fails here must be killed; its stream is no longer in a
    /// known state.
    pub async fn exchange(
        &mut self,
        request: &JobRequest,
        timeout: Duration,
    ) -> ExecutionResult<JobResponse> {
        let pid = self.pid();
        let transport = &mut self.transport;
        let outcome = tokio::time::timeout(timeout, async move {
            transport.send(request).await?;
            transport.receive::<JobResponse>().await
        })
        .await;
        self.is_new = false;

        let response = match outcome {
            Err(_) => {
                warn!(pid, ?timeout, "Worker timed out");
                return Err(ExecutionError::TimedOut(timeout));
            }
            Ok(Err(e)) => {
                if e.is_fatal() {
                    warn!(pid, error = %e, "Worker broke the protocol");
                } else {
                    warn!(pid, error = %e, "Lost connection to worker");
                }
                return Err(ExecutionError::HostProcessDied(e.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        if self.control.has_exited() {
            return Err(ExecutionError::HostProcessDied(
                "process exited after replying".to_string(),
            ));
        }

        Ok(response)
    }
}

impl fmt::Debug for WorkerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProcess")
            .field("id", &self.id)
            .field("pid", &self.pid())
            .field("is_new", &self.is_new)
            .finish()
    }
}
