//! Worker process pool
//!
//! The pool owns every worker slot: placeholders reserved before a launch,
//! launched processes waiting to register, and registered workers. Idle
//! workers sit in a FIFO queue; a worker taken by [`ProcessPool::get`] is
//! owned by the caller until it comes back through [`ProcessPool::enqueue`]
//! or is killed.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use scriptbox_config::PoolConfig;
use scriptbox_ipc::FramedTransport;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dispatcher::WorkerSource;
use crate::error::{ExecutionError, ExecutionResult};
use crate::launcher::{ProcessControl, WorkerLauncher};
use crate::limiter::ResourceLimiter;
use crate::listener;
use crate::worker::WorkerProcess;

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Every slot, including placeholders
    pub total: usize,
    /// Registered workers, idle or handed out
    pub live: usize,
    /// Placeholders and launched workers that have not registered yet
    pub reserved: usize,
    pub idle: usize,
}

enum Slot {
    Reserved,
    Launching(Arc<dyn ProcessControl>),
    Live(Arc<dyn ProcessControl>),
}

impl Slot {
    fn control(&self) -> Option<&Arc<dyn ProcessControl>> {
        match self {
            Slot::Reserved => None,
            Slot::Launching(control) | Slot::Live(control) => Some(control),
        }
    }
}

struct PoolState {
    slots: HashMap<u64, Slot>,
    idle: VecDeque<WorkerProcess>,
    next_id: u64,
    last_get: Instant,
    last_spawn: Instant,
    last_block: Instant,
}

impl PoolState {
    fn prune_dead(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| match slot {
            Slot::Reserved => true,
            Slot::Launching(control) | Slot::Live(control) => !control.has_exited(),
        });
        self.idle.retain(|worker| !worker.is_dead());
        before - self.slots.len()
    }

    fn take_idle(&mut self) -> Option<WorkerProcess> {
        while let Some(worker) = self.idle.pop_front() {
            if !worker.is_dead() {
                return Some(worker);
            }
            debug!(pid = worker.pid(), "Skipping dead idle worker");
            self.slots.remove(&worker.id());
        }
        None
    }
}

enum ReapAction {
    Refill,
    Retire(WorkerProcess),
}

pub struct ProcessPool {
    me: Weak<ProcessPool>,
    config: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    limiter: ResourceLimiter,
    local_addr: SocketAddr,
    state: Mutex<PoolState>,
    launched: Notify,
    disposed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessPool {
    /// Bind the listener and start the background tasks
    ///
    /// Workers are not spawned eagerly; the reaper refills the pool to
    /// `min_workers` on its first ticks.
    pub async fn start(
        config: PoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> ExecutionResult<Arc<Self>> {
        let listener = TcpListener::bind((config.bind_address.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        let limiter = ResourceLimiter::from_config(&config);
        let now = Instant::now();

        let pool = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            launcher,
            limiter,
            local_addr,
            state: Mutex::new(PoolState {
                slots: HashMap::new(),
                idle: VecDeque::new(),
                next_id: 1,
                last_get: now,
                last_spawn: now,
                last_block: now,
            }),
            launched: Notify::new(),
            disposed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        let listener_task = tokio::spawn(listener::serve(listener, Arc::downgrade(&pool)));
        let reaper_task = tokio::spawn(reap(Arc::downgrade(&pool), pool.config.reaper_interval));
        pool.tasks.lock().extend([listener_task, reaper_task]);

        info!(
            %local_addr,
            min_workers = pool.config.min_workers,
            max_workers = pool.config.max_workers,
            limiting = pool.limiter.is_enabled(),
            "Process pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Address workers connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> ExecutionResult<()> {
        if self.is_disposed() {
            Err(ExecutionError::PoolDisposed)
        } else {
            Ok(())
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let live = state
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count();

        PoolStats {
            total: state.slots.len(),
            live,
            reserved: state.slots.len() - live,
            idle: state.idle.len(),
        }
    }

    /// Pids of registered workers
    pub fn worker_pids(&self) -> Vec<u32> {
        let state = self.state.lock();
        let mut pids: Vec<u32> = state
            .slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Live(control) => Some(control.pid()),
                _ => None,
            })
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Take an idle worker, spawning and waiting for one if none is idle
    pub async fn get(&self) -> ExecutionResult<WorkerProcess> {
        self.ensure_running()?;
        self.state.lock().last_get = Instant::now();

        let mut first_pass = true;
        loop {
            self.ensure_running()?;

            let should_spawn = {
                let mut state = self.state.lock();
                if let Some(worker) = state.take_idle() {
                    return Ok(worker);
                }

                let under_max = state.slots.len() < self.config.max_workers;
                under_max
                    && (first_pass || state.last_spawn.elapsed() > self.config.spawn_cooldown)
            };

            if should_spawn {
                if let Err(e) = self.spawn().await {
                    warn!(error = %e, "Failed to spawn worker");
                }
            }
            first_pass = false;

            self.state.lock().last_block = Instant::now();
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Return a worker for reuse; dead workers are dropped
    pub fn enqueue(&self, worker: WorkerProcess) {
        if worker.is_dead() {
            debug!(pid = worker.pid(), "Not reusing dead worker");
            return;
        }

        if self.is_disposed() {
            worker.kill();
            return;
        }

        self.state.lock().idle.push_back(worker);
    }

    /// Launch one worker if the pool is under `max_workers`
    ///
    /// Returns `Ok(false)` when the pool is already full. The slot is
    /// reserved before the process starts so concurrent callers never
    /// launch past the limit.
    pub async fn spawn(&self) -> ExecutionResult<bool> {
        let id = {
            let mut state = self.state.lock();
            self.ensure_running()?;
            if state.slots.len() >= self.config.max_workers {
                return Ok(false);
            }

            let id = state.next_id;
            state.next_id += 1;
            state.slots.insert(id, Slot::Reserved);
            state.last_spawn = Instant::now();
            id
        };

        info!(slot = id, "Spawning new worker");

        match self.launch(id).await {
            Ok(control) => {
                self.arm_registration_deadline(id, control);
                Ok(true)
            }
            Err(e) => {
                self.state.lock().slots.remove(&id);
                Err(e)
            }
        }
    }

    async fn launch(&self, id: u64) -> ExecutionResult<Arc<dyn ProcessControl>> {
        let control = self.launcher.launch(self.local_addr).await?;
        self.limiter.apply(&control)?;

        {
            let mut state = self.state.lock();
            match state.slots.get_mut(&id) {
                Some(slot) if !self.is_disposed() => *slot = Slot::Launching(control.clone()),
                _ => {
                    control.kill();
                    return Err(ExecutionError::PoolDisposed);
                }
            }
        }

        self.launched.notify_waiters();
        Ok(control)
    }

    fn arm_registration_deadline(&self, id: u64, control: Arc<dyn ProcessControl>) {
        let pool = self.me.clone();
        let deadline = self.config.registration_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;

            let expired = match pool.upgrade() {
                Some(pool) => {
                    let mut state = pool.state.lock();
                    let waiting = matches!(state.slots.get(&id), Some(Slot::Launching(_)));
                    if waiting {
                        state.slots.remove(&id);
                    }
                    waiting
                }
                None => true,
            };

            if expired {
                warn!(pid = control.pid(), "Worker took too long to register, killing");
                control.kill();
            }
        });
    }

    /// Wait until a launched, unregistered process with `pid` is known
    pub(crate) async fn wait_for_launch(
        &self,
        pid: u32,
        deadline: tokio::time::Instant,
    ) -> Option<(u64, Arc<dyn ProcessControl>)> {
        loop {
            let launched = self.launched.notified();

            let found = self.state.lock().slots.iter().find_map(|(id, slot)| match slot {
                Slot::Launching(control) if control.pid() == pid => Some((*id, control.clone())),
                _ => None,
            });
            if found.is_some() {
                return found;
            }

            if tokio::time::timeout_at(deadline, launched).await.is_err() {
                return None;
            }
        }
    }

    /// Move a launched slot to live and queue its worker
    ///
    /// Fails if the slot was reclaimed in the meantime; the caller kills the
    /// process.
    pub(crate) fn register(
        &self,
        id: u64,
        control: Arc<dyn ProcessControl>,
        transport: FramedTransport<TcpStream>,
    ) -> bool {
        let mut state = self.state.lock();
        if self.is_disposed() || !matches!(state.slots.get(&id), Some(Slot::Launching(_))) {
            return false;
        }

        state.slots.insert(id, Slot::Live(control.clone()));
        state
            .idle
            .push_back(WorkerProcess::new(id, control, transport));
        true
    }

    async fn reap_once(&self) {
        let action = {
            let mut state = self.state.lock();
            let pruned = state.prune_dead();
            if pruned > 0 {
                debug!(pruned, worker_count = state.slots.len(), "Pruned dead workers");
            }

            let count = state.slots.len();
            if count < self.config.min_workers {
                Some(ReapAction::Refill)
            } else if count <= self.config.min_workers
                || state.last_get.elapsed() < self.config.retire_after_get_quiet
                || state.last_spawn.elapsed() < self.config.retire_after_spawn_quiet
                || state.last_block.elapsed() < self.config.retire_after_block_quiet
            {
                None
            } else {
                state.idle.pop_front().map(|worker| {
                    state.slots.remove(&worker.id());
                    ReapAction::Retire(worker)
                })
            }
        };

        match action {
            Some(ReapAction::Refill) => {
                if let Err(e) = self.spawn().await {
                    warn!(error = %e, "Failed to refill pool");
                }
            }
            Some(ReapAction::Retire(worker)) => {
                info!(pid = worker.pid(), "Retiring idle worker");
                worker.kill();
            }
            None => {}
        }
    }

    /// Stop accepting jobs and kill every worker. Idempotent.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let (idle, controls) = {
            let mut state = self.state.lock();
            let idle = std::mem::take(&mut state.idle);
            let controls: Vec<_> = state
                .slots
                .drain()
                .filter_map(|(_, slot)| slot.control().cloned())
                .collect();
            (idle, controls)
        };

        drop(idle);
        for control in &controls {
            control.kill();
        }

        info!(killed = controls.len(), "Process pool shut down");
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl WorkerSource for ProcessPool {
    async fn get(&self) -> ExecutionResult<WorkerProcess> {
        ProcessPool::get(self).await
    }

    fn enqueue(&self, worker: WorkerProcess) {
        ProcessPool::enqueue(self, worker)
    }
}

async fn reap(pool: Weak<ProcessPool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(pool) = pool.upgrade() else {
            break;
        };
        if pool.is_disposed() {
            break;
        }
        pool.reap_once().await;
    }
}
