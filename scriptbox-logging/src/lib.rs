//! Logging setup for scriptbox
//!
//! Both the coordinator and its worker processes log through `tracing`. The
//! coordinator writes to stdout; workers write to stderr, which the pool
//! leaves attached to the coordinator's terminal.

pub mod init;

pub use init::{build_filter, init_logging, Target};
pub use scriptbox_config::{LogFormat, LogLevel, LoggingConfig};
