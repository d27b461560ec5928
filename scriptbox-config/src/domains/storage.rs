//! Variable storage configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{
    validate_duration, validate_positive, validate_required_string, Validatable,
};

/// Variable storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// sqlx connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a transaction waits on a locked variable row
    ///
    /// Must be at least `execution.new_worker_timeout`; a job holding the
    /// lock can run that long.
    #[serde(with = "humantime_serde", default = "default_busy_timeout")]
    pub busy_timeout: Duration,

    /// Longest variable name that can be persisted
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,

    /// Largest serialized value that can be persisted, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout: default_busy_timeout(),
            max_name_length: default_max_name_length(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl Validatable for StorageConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.database_url, "database_url", self.domain_name())?;

        if !self.database_url.starts_with("sqlite:") {
            return Err(self.validation_error(format!(
                "database_url must be a sqlite URL, got '{}'",
                self.database_url
            )));
        }

        validate_positive(self.max_connections, "max_connections", self.domain_name())?;
        validate_duration(self.busy_timeout, "busy_timeout", self.domain_name())?;
        validate_positive(self.max_name_length, "max_name_length", self.domain_name())?;
        validate_positive(self.max_payload_bytes, "max_payload_bytes", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "storage"
    }
}

// Default value functions
fn default_database_url() -> String {
    "sqlite://scriptbox.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_max_name_length() -> usize {
    512
}

fn default_max_payload_bytes() -> usize {
    10 * 1024
}
