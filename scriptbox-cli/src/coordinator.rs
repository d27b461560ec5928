//! The pool owner side of a CLI session

use std::sync::Arc;

use anyhow::{Context, Result};
use scriptbox_config::ScriptboxConfig;
use scriptbox_execution::{CommandLauncher, ExecutionDispatcher, MethodPublisher, ProcessPool};
use scriptbox_state::SqliteVariableStore;
use tracing::{debug, info};

/// A running pool, its dispatcher and the variable store
pub struct Coordinator {
    pool: Arc<ProcessPool>,
    dispatcher: Arc<ExecutionDispatcher>,
    store: SqliteVariableStore,
}

impl Coordinator {
    /// Open the store and start the pool
    ///
    /// `worker_args` are appended to every worker's command line.
    pub async fn start(config: &ScriptboxConfig, worker_args: Vec<String>) -> Result<Self> {
        let store = SqliteVariableStore::connect(&config.storage)
            .await
            .context("Failed to open variable store")?;
        store
            .migrate()
            .await
            .context("Failed to prepare variable store")?;

        let launcher = CommandLauncher::from_config(&config.pool)
            .context("Failed to locate the worker program")?
            .with_args(worker_args);
        debug!(program = %launcher.program().display(), "Worker program");

        let pool = ProcessPool::start(config.pool.clone(), Arc::new(launcher))
            .await
            .context("Failed to start the process pool")?;
        let dispatcher = Arc::new(ExecutionDispatcher::new(
            pool.clone(),
            config.execution.clone(),
        ));

        info!(addr = %pool.local_addr(), "Coordinator ready");
        Ok(Self {
            pool,
            dispatcher,
            store,
        })
    }

    pub fn dispatcher(&self) -> &ExecutionDispatcher {
        &self.dispatcher
    }

    pub fn publisher(&self) -> MethodPublisher {
        MethodPublisher::new(self.dispatcher.clone(), Arc::new(self.store.clone()))
    }

    /// Kill every worker and close the store
    pub async fn shutdown(self) {
        self.pool.shutdown();
        self.store.close().await;
    }
}
