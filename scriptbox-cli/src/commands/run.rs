use anyhow::Result;
use scriptbox_config::ScriptboxConfig;
use scriptbox_execution::RunOutcome;

use crate::cli::IdentityArgs;
use crate::coordinator::Coordinator;

/// Start a pool, run `source` once and print what it produced
pub async fn handle(
    config: &ScriptboxConfig,
    worker_args: Vec<String>,
    identity: &IdentityArgs,
    source: &str,
) -> Result<()> {
    let coordinator = Coordinator::start(config, worker_args).await?;
    let outcome = coordinator
        .dispatcher()
        .run(&identity.identity(), source)
        .await;
    coordinator.shutdown().await;

    if let Some(outcome) = outcome {
        print_outcome(&outcome);
    }
    Ok(())
}

pub fn print_outcome(outcome: &RunOutcome) {
    if !outcome.output.is_empty() {
        println!("{}", outcome.output);
    }
    if let Some(image) = &outcome.image {
        println!("[image: {} bytes]", image.len());
    }
}
