//! Domain-specific configuration modules

pub mod execution;
pub mod logging;
pub mod pool;
pub mod storage;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main scriptbox configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScriptboxConfig {
    /// Worker process pool
    #[serde(default)]
    pub pool: pool::PoolConfig,

    /// Job dispatch and worker-side limits
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// Variable persistence
    #[serde(default)]
    pub storage: storage::StorageConfig,

    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl ScriptboxConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.pool.validate()?;
        self.execution.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;

        if self.storage.busy_timeout < self.execution.new_worker_timeout {
            return Err(self.storage.validation_error(format!(
                "busy_timeout ({:?}) must be at least execution.new_worker_timeout ({:?})",
                self.storage.busy_timeout, self.execution.new_worker_timeout
            )));
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = ScriptboxConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
