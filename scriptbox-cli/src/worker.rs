//! `scriptbox --worker`: the process the pool launches

use std::sync::Arc;

use anyhow::{Context, Result};
use scriptbox_config::ScriptboxConfig;
use scriptbox_js::{run_worker, HostConfig, ScriptHost};
use scriptbox_state::SqliteVariableStore;
use tracing::info;

/// Interpreter threads recurse deeply; the recursion limit is tuned for this
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

pub fn run(config: &ScriptboxConfig, port: u16) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_stack_size(WORKER_STACK_SIZE)
        .enable_all()
        .build()
        .context("Failed to start worker runtime")?;

    runtime.block_on(async {
        let store = SqliteVariableStore::connect(&config.storage)
            .await
            .context("Failed to open variable store")?;
        store
            .migrate()
            .await
            .context("Failed to prepare variable store")?;

        info!(pid = std::process::id(), port, "Worker starting");
        let host = Arc::new(ScriptHost::new(
            Arc::new(store.clone()),
            HostConfig::from_config(config),
        ));

        let result = run_worker(port, host).await;
        store.close().await;
        result.context("Worker failed")
    })
}
