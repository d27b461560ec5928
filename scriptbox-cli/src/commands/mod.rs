//! CLI command implementations

pub mod config;
pub mod console;
pub mod method;
pub mod run;

use anyhow::Result;
use scriptbox_config::ScriptboxConfig;

use crate::cli::{Cli, Commands};

pub async fn dispatch(command: &Commands, cli: &Cli, config: ScriptboxConfig) -> Result<()> {
    match command {
        Commands::Run { identity, source } => {
            run::handle(&config, cli.worker_args(), identity, &source.read()?).await
        }
        Commands::Method {
            identity,
            code,
            name,
        } => {
            method::handle(
                &config,
                cli.worker_args(),
                identity,
                name.as_deref(),
                &code.read()?,
            )
            .await
        }
        Commands::Console { identity, history } => {
            console::handle(&config, cli.worker_args(), identity, history.as_ref()).await
        }
        Commands::Config { config_cmd } => config::handle(config_cmd, cli.config.as_ref()),
    }
}
