use anyhow::{Context, Result};
use scriptbox_config::ScriptboxConfig;

use crate::cli::IdentityArgs;
use crate::coordinator::Coordinator;

pub async fn handle(
    config: &ScriptboxConfig,
    worker_args: Vec<String>,
    identity: &IdentityArgs,
    name: Option<&str>,
    code: &str,
) -> Result<()> {
    let coordinator = Coordinator::start(config, worker_args).await?;
    let result = coordinator
        .publisher()
        .publish(&identity.identity(), name, code)
        .await;
    coordinator.shutdown().await;

    let outcome = result.context("Failed to publish method")?;
    println!("{}", outcome.message());
    Ok(())
}
