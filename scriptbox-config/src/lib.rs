//! Domain-driven configuration management for scriptbox
//!
//! Configuration is split by functional domain (worker pool, execution,
//! variable storage, logging), each with serde defaults and validation, and
//! can be overridden through `SCRIPTBOX_*` environment variables.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    execution::ExecutionConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    pool::{LimiterConfig, PoolConfig},
    storage::StorageConfig,
    ScriptboxConfig,
};
