//! Launching worker processes

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use scriptbox_config::PoolConfig;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{ExecutionError, ExecutionResult};

/// Handle on a launched worker's OS process
pub trait ProcessControl: Send + Sync {
    fn pid(&self) -> u32;

    /// True once the process has exited or [`ProcessControl::kill`] was called
    fn has_exited(&self) -> bool;

    /// Terminate the process; never blocks
    fn kill(&self);
}

/// Starts worker processes that connect back to the pool listener
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, pool_addr: SocketAddr) -> ExecutionResult<Arc<dyn ProcessControl>>;
}

/// Launches workers by executing a program with `--worker --port <port>`
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Use the configured worker program, or re-execute the current binary
    pub fn from_config(config: &PoolConfig) -> ExecutionResult<Self> {
        let program = match &config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        Ok(Self {
            program,
            args: config.worker_args.clone(),
            env: config.worker_env.clone(),
        })
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn launch(&self, pool_addr: SocketAddr) -> ExecutionResult<Arc<dyn ProcessControl>> {
        let child = Command::new(&self.program)
            .arg("--worker")
            .arg("--port")
            .arg(pool_addr.port().to_string())
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::SpawnFailed(format!("{}: {}", self.program.display(), e))
            })?;

        let pid = child.id().ok_or_else(|| {
            ExecutionError::SpawnFailed("worker exited before reporting a pid".to_string())
        })?;

        debug!(pid, program = %self.program.display(), "Launched worker process");
        Ok(Arc::new(ChildControl::new(pid, child)))
    }
}

/// [`ProcessControl`] over a `tokio::process::Child`
pub struct ChildControl {
    pid: u32,
    child: Mutex<Child>,
    killed: AtomicBool,
}

impl ChildControl {
    pub fn new(pid: u32, child: Child) -> Self {
        Self {
            pid,
            child: Mutex::new(child),
            killed: AtomicBool::new(false),
        }
    }
}

impl ProcessControl for ChildControl {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn has_exited(&self) -> bool {
        if self.killed.load(Ordering::Acquire) {
            return true;
        }

        // An error here means the child can no longer be observed; treat it as gone
        !matches!(self.child.lock().try_wait(), Ok(None))
    }

    fn kill(&self) {
        if self.killed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.child.lock().start_kill() {
            debug!(pid = self.pid, error = %e, "Worker already gone");
        } else {
            debug!(pid = self.pid, "Killed worker process");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let launcher = CommandLauncher::new("/nonexistent/scriptbox-worker");
        let result = launcher.launch("127.0.0.1:35555".parse().unwrap()).await;
        assert!(matches!(result, Err(ExecutionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_kill_marks_exited() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        let control = ChildControl::new(pid, child);

        assert_eq!(control.pid(), pid);
        assert!(!control.has_exited());

        control.kill();
        assert!(control.has_exited());
        control.kill();
    }

    #[test]
    fn test_from_config_prefers_worker_program() {
        let config = PoolConfig {
            worker_program: Some(PathBuf::from("/usr/local/bin/scriptbox")),
            worker_args: vec!["--config".to_string(), "prod.yaml".to_string()],
            ..Default::default()
        };

        let launcher = CommandLauncher::from_config(&config).unwrap();
        assert_eq!(launcher.program(), &PathBuf::from("/usr/local/bin/scriptbox"));
        assert_eq!(launcher.args, vec!["--config", "prod.yaml"]);
    }
}
