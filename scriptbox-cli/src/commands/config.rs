//! `scriptbox config ...`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scriptbox_config::{ConfigLoader, ScriptboxConfig};

use crate::cli::ConfigCommands;

pub fn handle(command: &ConfigCommands, global_config: Option<&PathBuf>) -> Result<()> {
    match command {
        ConfigCommands::Validate { file } => {
            let path = file
                .as_ref()
                .or(global_config)
                .context("No configuration file given; pass --file or --config")?;
            validate(path)
        }
        ConfigCommands::Generate { output, force } => match output {
            Some(path) => generate(path, *force),
            None => {
                print!("{}", ScriptboxConfig::generate_sample());
                Ok(())
            }
        },
    }
}

fn validate(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Configuration file not found: {:?}", path));
    }

    match ConfigLoader::new().from_file(path) {
        Ok(_) => {
            println!("✅ Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed: {}", e);
            Err(e).context(format!("Invalid configuration in {:?}", path))
        }
    }
}

fn generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    fs::write(output, ScriptboxConfig::generate_sample())
        .context("Failed to write configuration file")?;

    println!("✅ Configuration generated at: {:?}", output);
    println!("🔧 Validate with: scriptbox config validate --file {:?}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generated_config_validates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("scriptbox.yaml");

        generate(&path, false).unwrap();
        validate(&path).unwrap();
    }

    #[test]
    fn test_generate_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scriptbox.yaml");
        fs::write(&path, "keep me").unwrap();

        assert!(generate(&path, false).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), "keep me");

        generate(&path, true).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("min_workers"));
    }

    #[test]
    fn test_validate_rejects_bad_pool_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "pool:\n  min_workers: 5\n  max_workers: 2\n").unwrap();

        assert!(validate(&path).is_err());
        assert!(validate(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_validate_needs_a_file() {
        let command = ConfigCommands::Validate { file: None };
        assert!(handle(&command, None).is_err());
    }
}
