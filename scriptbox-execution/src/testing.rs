//! In-process workers for pool and dispatcher tests
//!
//! Each "process" is a tokio task speaking the worker side of the protocol.
//! Killing one aborts the task, which closes its connection the same way a
//! dead OS process would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scriptbox_config::PoolConfig;
use scriptbox_ipc::{
    FramedTransport, Handshake, HandshakeAck, IpcTransport, JobRequest, JobResponse,
};
use tokio::task::JoinHandle;

use crate::error::{ExecutionError, ExecutionResult};
use crate::launcher::{ProcessControl, WorkerLauncher};

pub(crate) fn fast_config(min_workers: usize, max_workers: usize) -> PoolConfig {
    PoolConfig {
        min_workers,
        max_workers,
        port: 0,
        poll_interval: Duration::from_millis(5),
        spawn_cooldown: Duration::from_millis(50),
        registration_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(1),
        reaper_interval: Duration::from_millis(10),
        limiters_enabled: false,
        ..Default::default()
    }
}

#[derive(Clone, Copy)]
enum Behaviour {
    Serve,
    Silent,
    Fail,
}

pub(crate) struct FakeProcess {
    pid: u32,
    killed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessControl for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

pub(crate) struct InProcessLauncher {
    behaviour: Mutex<Behaviour>,
    failed: AtomicUsize,
    next_pid: AtomicU32,
    launched: Mutex<Vec<Arc<FakeProcess>>>,
}

impl InProcessLauncher {
    fn with_behaviour(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour: Mutex::new(behaviour),
            failed: AtomicUsize::new(0),
            next_pid: AtomicU32::new(70_000),
            launched: Mutex::new(Vec::new()),
        })
    }

    /// Workers that register and answer jobs
    pub fn new() -> Arc<Self> {
        Self::with_behaviour(Behaviour::Serve)
    }

    /// Workers that never connect
    pub fn silent() -> Arc<Self> {
        Self::with_behaviour(Behaviour::Silent)
    }

    /// Every launch fails
    pub fn failing() -> Arc<Self> {
        Self::with_behaviour(Behaviour::Fail)
    }

    /// Let later launches succeed and serve jobs
    pub fn recover(&self) {
        *self.behaviour.lock() = Behaviour::Serve;
    }

    /// Launches rejected while failing
    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().len()
    }

    pub fn killed_count(&self) -> usize {
        self.launched
            .lock()
            .iter()
            .filter(|process| process.has_exited())
            .count()
    }

    /// Kill every launched worker from outside the pool
    pub fn kill_all(&self) {
        for process in self.launched.lock().iter() {
            process.kill();
        }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, pool_addr: SocketAddr) -> ExecutionResult<Arc<dyn ProcessControl>> {
        let behaviour = *self.behaviour.lock();
        if matches!(behaviour, Behaviour::Fail) {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(ExecutionError::SpawnFailed("launcher disabled".to_string()));
        }

        let process = Arc::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            killed: AtomicBool::new(false),
            task: Mutex::new(None),
        });

        if matches!(behaviour, Behaviour::Serve) {
            let task = tokio::spawn(serve(process.clone(), pool_addr));
            *process.task.lock() = Some(task);
        }

        self.launched.lock().push(process.clone());
        Ok(process)
    }
}

/// Job sources understood by in-process workers:
/// `sleep:<ms>` answers after a delay, `die` exits mid-job, anything else is
/// echoed back.
async fn serve(process: Arc<FakeProcess>, pool_addr: SocketAddr) {
    let Ok(mut transport) = FramedTransport::connect(pool_addr).await else {
        return;
    };

    let pid = process.pid as i32;
    if transport.send(&Handshake { pid }).await.is_err() {
        return;
    }
    match transport.receive::<HandshakeAck>().await {
        Ok(ack) if ack.is_accepted() => {}
        _ => return,
    }

    while let Ok(request) = transport.receive::<JobRequest>().await {
        let output = if let Some(ms) = request.source.strip_prefix("sleep:") {
            let ms = ms.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            format!("slept {}ms", ms)
        } else if request.source == "die" {
            process.killed.store(true, Ordering::SeqCst);
            return;
        } else {
            format!("echo: {}", request.source)
        };

        if transport.send(&JobResponse::text(output)).await.is_err() {
            return;
        }
    }
}
