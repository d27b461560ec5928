//! CLI argument parsing definitions

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scriptbox_execution::Identity;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Run as worker process (internal use)
    #[arg(long, hide = true)]
    pub worker: bool,

    /// Pool port to register with (used with --worker)
    #[arg(long, value_name = "PORT", hide = true, requires = "worker")]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Global flags forwarded to worker processes
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        if let Some(level) = &self.log_level {
            args.push("--log-level".to_string());
            args.push(level.clone());
        }
        args
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script once and print its output
    Run {
        #[command(flatten)]
        identity: IdentityArgs,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Publish a named function as a stored method
    Method {
        #[command(flatten)]
        identity: IdentityArgs,

        #[command(flatten)]
        code: CodeArgs,

        /// Method name; defaults to the name of the declared function.
        /// Operator names such as `<>` take a function expression.
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
    },

    /// Interactive console; every line runs as one script
    Console {
        #[command(flatten)]
        identity: IdentityArgs,

        /// History file
        #[arg(long, value_name = "PATH")]
        history: Option<PathBuf>,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file; defaults to --config
        #[arg(long, value_name = "PATH")]
        file: Option<PathBuf>,
    },

    /// Generate a sample configuration file with every default
    Generate {
        /// Output file path; prints to stdout when omitted
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

/// Who a script runs as
#[derive(Args, Debug, Clone)]
pub struct IdentityArgs {
    #[arg(long, value_name = "NAME", default_value = "cli")]
    pub service: String,

    #[arg(long, value_name = "ID", default_value = "local")]
    pub user_id: String,

    #[arg(long, value_name = "NAME", default_value = "local")]
    pub user_name: String,
}

impl IdentityArgs {
    pub fn identity(&self) -> Identity {
        Identity::new(&self.service, &self.user_id, &self.user_name)
    }
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Script source
    #[arg(long, value_name = "CODE")]
    pub source: Option<String>,

    /// Read the script from a file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

impl SourceArgs {
    pub fn read(&self) -> Result<String> {
        read_inline_or_file(self.source.as_ref(), self.file.as_ref())
    }
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct CodeArgs {
    /// Method code
    #[arg(long, value_name = "CODE")]
    pub code: Option<String>,

    /// Read the method code from a file
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

impl CodeArgs {
    pub fn read(&self) -> Result<String> {
        read_inline_or_file(self.code.as_ref(), self.file.as_ref())
    }
}

fn read_inline_or_file(inline: Option<&String>, file: Option<&PathBuf>) -> Result<String> {
    match (inline, file) {
        (Some(text), _) => Ok(text.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, None) => Err(anyhow::anyhow!("No code given")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_flags() {
        let cli = Cli::try_parse_from(["scriptbox", "--worker", "--port", "35555"]).unwrap();
        assert!(cli.worker);
        assert_eq!(cli.port, Some(35555));
        assert!(cli.command.is_none());

        assert!(Cli::try_parse_from(["scriptbox", "--port", "35555"]).is_err());
    }

    #[test]
    fn test_run_requires_exactly_one_source() {
        assert!(Cli::try_parse_from(["scriptbox", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["scriptbox", "run", "--source", "1", "--file", "x.js"]).is_err()
        );

        let cli = Cli::try_parse_from(["scriptbox", "run", "--source", "1+1"]).unwrap();
        let Some(Commands::Run { identity, source }) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(source.read().unwrap(), "1+1");
        assert_eq!(identity.identity(), Identity::new("cli", "local", "local"));
    }

    #[test]
    fn test_worker_args_forward_globals() {
        let cli = Cli::try_parse_from([
            "scriptbox",
            "--config",
            "box.yaml",
            "--log-level",
            "debug",
            "config",
            "generate",
        ])
        .unwrap();
        assert_eq!(
            cli.worker_args(),
            ["--config", "box.yaml", "--log-level", "debug"]
        );
    }
}
