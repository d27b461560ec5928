//! Job execution for scriptbox
//!
//! This crate owns the worker side of the system as seen from the
//! coordinator: a pool of worker processes that register over a local TCP
//! listener, external resource limiting of those processes, and the
//! [`ExecutionDispatcher`] that turns "run this source for this caller" into
//! one guarded request/response exchange with a worker.

pub mod dispatcher;
pub mod error;
pub mod launcher;
pub mod limiter;
mod listener;
pub mod pool;
pub mod publisher;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export main types
pub use dispatcher::{ExecutionDispatcher, Identity, Job, RunOutcome, WorkerSource};
pub use error::{ExecutionError, ExecutionResult};
pub use launcher::{ChildControl, CommandLauncher, ProcessControl, WorkerLauncher};
pub use limiter::ResourceLimiter;
pub use pool::{PoolStats, ProcessPool};
pub use publisher::{MethodPublisher, PublishOutcome, ScriptRunner, METHOD_UPDATED, NOT_A_METHOD};
pub use worker::WorkerProcess;
