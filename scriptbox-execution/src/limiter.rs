//! External CPU and memory limiting of worker processes
//!
//! Limiting is best effort and done by other programs (`cpulimit`, `prlimit`)
//! pointed at the worker's pid. A worker is never left running unconstrained:
//! if a limiter cannot be started, or later exits unsuccessfully, the worker
//! is killed.

use std::process::Stdio;
use std::sync::Arc;

use scriptbox_config::{LimiterConfig, PoolConfig};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::launcher::ProcessControl;

#[derive(Debug, Clone, Default)]
pub struct ResourceLimiter {
    limiters: Vec<LimiterConfig>,
}

impl ResourceLimiter {
    pub fn new(limiters: Vec<LimiterConfig>) -> Self {
        Self { limiters }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        if config.limiters_enabled {
            Self::new(config.limiters.clone())
        } else {
            Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.limiters.is_empty()
    }

    /// Start every limiter against `worker`
    ///
    /// On failure the worker has already been killed.
    pub fn apply(&self, worker: &Arc<dyn ProcessControl>) -> ExecutionResult<()> {
        for limiter in &self.limiters {
            if let Err(e) = self.start(limiter, worker) {
                worker.kill();
                return Err(e);
            }
        }
        Ok(())
    }

    fn start(&self, limiter: &LimiterConfig, worker: &Arc<dyn ProcessControl>) -> ExecutionResult<()> {
        let pid = worker.pid();
        let mut child = Command::new(&limiter.program)
            .args(limiter.render_args(pid))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                warn!(pid, program = %limiter.program, error = %e, "Limiter did not start");
                ExecutionError::LimiterFailed(limiter.program.clone())
            })?;

        debug!(pid, program = %limiter.program, "Started resource limiter");

        let program = limiter.program.clone();
        let worker = Arc::clone(worker);
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    debug!(pid, program = %program, "Resource limiter finished");
                }
                Ok(status) => {
                    warn!(pid, program = %program, %status, "Limiter unsuccessful, killing worker");
                    worker.kill();
                }
                Err(e) => {
                    warn!(pid, program = %program, error = %e, "Lost limiter, killing worker");
                    worker.kill();
                }
            }
        });

        Ok(())
    }
}
