use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use scriptbox_config::{ConfigLoader, ScriptboxConfig};
use scriptbox_logging::{init_logging, Target};
use tracing::debug;

mod cli;
mod commands;
mod coordinator;
mod worker;

use cli::{Cli, Commands};

/// Load configuration from file, or from defaults plus environment
fn load_config(config_path: Option<&PathBuf>) -> Result<ScriptboxConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => loader
            .from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config commands work on files and must not depend on a loadable config
    if let Some(Commands::Config { config_cmd }) = &cli.command {
        return commands::config::handle(config_cmd, cli.config.as_ref());
    }

    let config = load_config(cli.config.as_ref())?;

    if cli.worker {
        let port = cli.port.context("--worker requires --port")?;
        init_logging(&config.logging, Target::Worker, cli.log_level.as_deref())?;
        return worker::run(&config, port);
    }

    let Some(command) = &cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    init_logging(&config.logging, Target::Coordinator, cli.log_level.as_deref())?;
    debug!("scriptbox starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(commands::dispatch(command, &cli, config))
}
