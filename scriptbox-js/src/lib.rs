//! JavaScript worker host for scriptbox
//!
//! A worker process connects back to its pool, registers, and then runs one
//! job at a time on the Boa engine. Every run gets a fresh interpreter
//! context and its own variable transaction: free variables in the script
//! resolve through the variable state cache and changed values are written
//! back when the script completes.

pub mod error;
pub mod host;
pub mod output;
pub mod worker;

mod bindings;
mod scope;

pub use error::{HostError, HostResult};
pub use host::{HostConfig, ScriptHost};
pub use output::LimitedOutput;
pub use worker::run_worker;
