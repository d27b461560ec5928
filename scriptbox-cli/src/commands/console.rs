//! Interactive console: every line is one run

use std::path::PathBuf;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use scriptbox_config::ScriptboxConfig;
use scriptbox_execution::Identity;
use tracing::warn;

use super::run::print_outcome;
use crate::cli::IdentityArgs;
use crate::coordinator::Coordinator;

const PROMPT: &str = "scriptbox> ";

/// Lines starting with this publish the rest of the line as a method
const METHOD_PREFIX: &str = "/method ";

pub async fn handle(
    config: &ScriptboxConfig,
    worker_args: Vec<String>,
    identity: &IdentityArgs,
    history: Option<&PathBuf>,
) -> Result<()> {
    let coordinator = Coordinator::start(config, worker_args).await?;
    let result = repl(&coordinator, &identity.identity(), history).await;
    coordinator.shutdown().await;
    result
}

async fn repl(
    coordinator: &Coordinator,
    identity: &Identity,
    history: Option<&PathBuf>,
) -> Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to start line editor")?;
    if let Some(path) = history {
        // A missing history file is normal on first use
        let _ = editor.load_history(path);
    }

    println!("scriptbox console. Each line runs as one script; '/method <code>' publishes a method.");
    println!("Press Ctrl+D to quit.");

    loop {
        match tokio::task::block_in_place(|| editor.readline(PROMPT)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                editor
                    .add_history_entry(line)
                    .context("Failed to record history")?;
                evaluate(coordinator, identity, line).await;
            }
            Err(ReadlineError::Interrupted) => {
                println!("Use Ctrl+D to quit");
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        }
    }

    if let Some(path) = history {
        if let Err(e) = editor.save_history(path) {
            warn!(error = %e, path = %path.display(), "Failed to save history");
        }
    }
    Ok(())
}

async fn evaluate(coordinator: &Coordinator, identity: &Identity, line: &str) {
    if let Some(code) = line.strip_prefix(METHOD_PREFIX) {
        match coordinator.publisher().publish(identity, None, code).await {
            Ok(outcome) => println!("{}", outcome.message()),
            Err(e) => println!("{}", e.user_message()),
        }
        return;
    }

    if let Some(outcome) = coordinator.dispatcher().run(identity, line).await {
        print_outcome(&outcome);
    }
}
