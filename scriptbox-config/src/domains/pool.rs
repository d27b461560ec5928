//! Worker process pool configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{
    validate_duration, validate_positive, validate_required_string, Validatable,
};

/// Placeholder substituted with the worker's process id in limiter arguments
pub const PID_PLACEHOLDER: &str = "{pid}";

/// Worker process pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker count the reaper keeps alive at all times
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Hard upper bound on live plus launching workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Address the listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listener port; 0 picks an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,

    /// How often a blocked `get()` re-checks the idle queue
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Minimum time between two spawns triggered by waiting callers
    #[serde(with = "humantime_serde", default = "default_spawn_cooldown")]
    pub spawn_cooldown: Duration,

    /// A launched worker that has not registered by then is killed
    #[serde(with = "humantime_serde", default = "default_registration_timeout")]
    pub registration_timeout: Duration,

    /// Deadline for reading the pid off a freshly accepted connection
    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_reaper_interval")]
    pub reaper_interval: Duration,

    /// No `get()` for this long before an idle worker may be retired
    #[serde(with = "humantime_serde", default = "default_retire_after_get_quiet")]
    pub retire_after_get_quiet: Duration,

    /// No spawn for this long before an idle worker may be retired
    #[serde(with = "humantime_serde", default = "default_retire_after_spawn_quiet")]
    pub retire_after_spawn_quiet: Duration,

    /// No blocked caller for this long before an idle worker may be retired
    #[serde(with = "humantime_serde", default = "default_retire_after_block_quiet")]
    pub retire_after_block_quiet: Duration,

    /// Worker executable; defaults to the running binary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,

    /// Extra arguments passed to every worker before `--worker --port N`
    #[serde(default)]
    pub worker_args: Vec<String>,

    /// Extra environment for worker processes
    #[serde(default)]
    pub worker_env: BTreeMap<String, String>,

    #[serde(default = "crate::domains::utils::default_true")]
    pub limiters_enabled: bool,

    /// External commands run against every new worker's pid
    #[serde(default = "default_limiters")]
    pub limiters: Vec<LimiterConfig>,
}

/// One external resource limiting command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub program: String,

    /// Argument template, `{pid}` is replaced with the worker pid
    pub args: Vec<String>,
}

impl LimiterConfig {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Arguments with the pid substituted
    pub fn render_args(&self, pid: u32) -> Vec<String> {
        let pid = pid.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(PID_PLACEHOLDER, &pid))
            .collect()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            bind_address: default_bind_address(),
            port: default_port(),
            poll_interval: default_poll_interval(),
            spawn_cooldown: default_spawn_cooldown(),
            registration_timeout: default_registration_timeout(),
            handshake_timeout: default_handshake_timeout(),
            reaper_interval: default_reaper_interval(),
            retire_after_get_quiet: default_retire_after_get_quiet(),
            retire_after_spawn_quiet: default_retire_after_spawn_quiet(),
            retire_after_block_quiet: default_retire_after_block_quiet(),
            worker_program: None,
            worker_args: Vec::new(),
            worker_env: BTreeMap::new(),
            limiters_enabled: true,
            limiters: default_limiters(),
        }
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.min_workers, "min_workers", self.domain_name())?;
        validate_positive(self.max_workers, "max_workers", self.domain_name())?;

        if self.min_workers > self.max_workers {
            return Err(self.validation_error(format!(
                "min_workers ({}) cannot exceed max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }

        validate_required_string(&self.bind_address, "bind_address", self.domain_name())?;

        validate_duration(self.poll_interval, "poll_interval", self.domain_name())?;
        validate_duration(self.spawn_cooldown, "spawn_cooldown", self.domain_name())?;
        validate_duration(
            self.registration_timeout,
            "registration_timeout",
            self.domain_name(),
        )?;
        validate_duration(self.handshake_timeout, "handshake_timeout", self.domain_name())?;
        validate_duration(self.reaper_interval, "reaper_interval", self.domain_name())?;

        if self.limiters_enabled {
            for limiter in &self.limiters {
                limiter.validate()?;
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

impl Validatable for LimiterConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.program, "program", self.domain_name())?;

        if !self.args.iter().any(|arg| arg.contains(PID_PLACEHOLDER)) {
            return Err(self.validation_error(format!(
                "arguments for '{}' must reference {}",
                self.program, PID_PLACEHOLDER
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool.limiters"
    }
}

// Default value functions
fn default_min_workers() -> usize {
    2
}

fn default_max_workers() -> usize {
    4
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    35555
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_spawn_cooldown() -> Duration {
    Duration::from_secs(5)
}

fn default_registration_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_millis(2500)
}

fn default_reaper_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_retire_after_get_quiet() -> Duration {
    Duration::from_secs(30)
}

fn default_retire_after_spawn_quiet() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_retire_after_block_quiet() -> Duration {
    Duration::from_secs(60)
}

fn default_limiters() -> Vec<LimiterConfig> {
    vec![
        // 50% of one core
        LimiterConfig::new("cpulimit", &["-z", "-l", "50", "-p", PID_PLACEHOLDER]),
        // 768 MiB address space
        LimiterConfig::new(
            "prlimit",
            &["--as=805306368", "--rss=65536", "--pid", PID_PLACEHOLDER],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_workers, 2);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.port, 35555);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.retire_after_spawn_quiet, Duration::from_secs(300));
        assert_eq!(config.limiters.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = PoolConfig {
            min_workers: 5,
            max_workers: 4,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cannot exceed"));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let config = PoolConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_limiter_requires_pid_placeholder() {
        let mut config = PoolConfig::default();
        config.limiters.push(LimiterConfig::new("renice", &["10"]));
        assert!(config.validate().is_err());

        config.limiters_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_render_args() {
        let limiter = &PoolConfig::default().limiters[0];
        assert_eq!(
            limiter.render_args(1234),
            vec!["-z", "-l", "50", "-p", "1234"]
        );
    }
}
