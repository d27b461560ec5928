//! Script-visible variable state for scriptbox
//!
//! Free variables in a script are backed by a persistent store. Each run gets
//! a [`VariableStateCache`] over one storage transaction: values are loaded on
//! first access under a row lock, snapshotted, and written back at commit only
//! if they changed since load.

pub mod cache;
pub mod error;
pub mod memory;
pub mod record;
pub mod snapshot;
pub mod sqlite;
pub mod store;
pub mod value;

pub use cache::{
    Builtins, CacheEntry, CacheLimits, CommitReport, Resolved, ValueHost, VariableStateCache,
    BUILTIN_NAMES,
};
pub use error::{StateError, StateResult};
pub use memory::MemoryVariableStore;
pub use record::{
    is_identifier, operator_key, storage_key, VariableKind, VariableRecord,
    METHOD_DECLARATION_VERSION, METHOD_EXPRESSION_VERSION, VALUE_VERSION,
};
pub use snapshot::{Snapshot, SnapshotKind};
pub use sqlite::SqliteVariableStore;
pub use store::{VariableStore, VariableTransaction};
pub use value::{values_equal, ObjectValue, ScriptValue, MAX_SNAPSHOT_DEPTH};
