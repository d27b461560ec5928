//! Job execution configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};

/// Job execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Sources at or above this many characters are rejected
    #[serde(default = "default_max_source_length")]
    pub max_source_length: usize,

    /// Response deadline for a worker's first job
    #[serde(with = "humantime_serde", default = "default_new_worker_timeout")]
    pub new_worker_timeout: Duration,

    /// Response deadline for a worker that has served jobs before
    #[serde(with = "humantime_serde", default = "default_warm_worker_timeout")]
    pub warm_worker_timeout: Duration,

    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    #[serde(default = "default_max_output_lines")]
    pub max_output_lines: usize,

    /// Interpreter call depth limit inside a worker
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_source_length: default_max_source_length(),
            new_worker_timeout: default_new_worker_timeout(),
            warm_worker_timeout: default_warm_worker_timeout(),
            max_output_chars: default_max_output_chars(),
            max_output_lines: default_max_output_lines(),
            recursion_limit: default_recursion_limit(),
        }
    }
}

impl ExecutionConfig {
    /// Response deadline for a worker, by whether it is fresh
    pub fn job_timeout(&self, is_new: bool) -> Duration {
        if is_new {
            self.new_worker_timeout
        } else {
            self.warm_worker_timeout
        }
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_source_length, "max_source_length", self.domain_name())?;
        validate_duration(
            self.new_worker_timeout,
            "new_worker_timeout",
            self.domain_name(),
        )?;
        validate_duration(
            self.warm_worker_timeout,
            "warm_worker_timeout",
            self.domain_name(),
        )?;

        if self.warm_worker_timeout > self.new_worker_timeout {
            return Err(self.validation_error(
                "warm_worker_timeout cannot be longer than new_worker_timeout",
            ));
        }

        validate_positive(self.max_output_chars, "max_output_chars", self.domain_name())?;
        validate_positive(self.max_output_lines, "max_output_lines", self.domain_name())?;
        validate_positive(self.recursion_limit, "recursion_limit", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

// Default value functions
fn default_max_source_length() -> usize {
    5000
}

fn default_new_worker_timeout() -> Duration {
    Duration::from_secs(12)
}

fn default_warm_worker_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_output_chars() -> usize {
    5 * 1024
}

fn default_max_output_lines() -> usize {
    1000
}

fn default_recursion_limit() -> usize {
    256
}
