//! Per-run variable state cache
//!
//! The interpreter binding routes every read and write of a free variable
//! through [`VariableStateCache::get`] and [`VariableStateCache::set`].
//! Values are loaded lazily under a row lock, snapshotted once, and written
//! back at [`VariableStateCache::commit`] only when they changed.
//!
//! All methods take `&self`: loading a method runs script code, which can
//! read other variables through the same cache. No internal borrow is held
//! across a call into the [`ValueHost`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use scriptbox_config::StorageConfig;

use crate::error::{StateError, StateResult};
use crate::record::{VariableKind, VariableRecord};
use crate::snapshot::{Snapshot, SnapshotKind};
use crate::store::{VariableStore, VariableTransaction};
use crate::value::{values_equal, ScriptValue};

/// Names resolved from the caller identity instead of storage
pub const BUILTIN_NAMES: [&str; 3] = ["service", "userId", "userName"];

/// The interpreter side of the cache
///
/// Implemented by the script engine binding. `Value` is the engine's own
/// value handle.
pub trait ValueHost {
    type Value: Clone;

    /// Materialize a stored value record
    fn decode(&mut self, name: &str, data: &str) -> StateResult<Self::Value>;

    /// Persistent form of a value
    fn encode(&mut self, value: &Self::Value) -> StateResult<String>;

    /// Canonical serialization if the value exposes a serialization hook,
    /// `None` otherwise
    fn canonical_form(&mut self, value: &Self::Value) -> StateResult<Option<String>>;

    /// Detached copy over the closed set of value kinds
    fn structural_clone(&mut self, value: &Self::Value) -> StateResult<ScriptValue>;

    /// Evaluate stored method source
    fn load_method(&mut self, name: &str, code: &str, version: i32) -> StateResult<Self::Value>;
}

/// Caller identity exposed to scripts as read-only variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Builtins {
    pub service: String,
    pub user_id: String,
    pub user_name: String,
}

impl Builtins {
    pub fn new(
        service: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "service" => Some(&self.service),
            "userId" => Some(&self.user_id),
            "userName" => Some(&self.user_name),
            _ => None,
        }
    }

    pub fn is_builtin(name: &str) -> bool {
        BUILTIN_NAMES.contains(&name)
    }
}

/// Persistence limits checked at commit
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_name_length: usize,
    pub max_payload_bytes: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for CacheLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_name_length: config.max_name_length,
            max_payload_bytes: config.max_payload_bytes,
        }
    }
}

/// One cached variable
#[derive(Debug)]
pub struct CacheEntry<V> {
    current: V,
    original: Snapshot,
    is_method: bool,
}

impl<V> CacheEntry<V> {
    pub fn current(&self) -> &V {
        &self.current
    }

    pub fn snapshot_kind(&self) -> SnapshotKind {
        self.original.kind()
    }

    pub fn is_method(&self) -> bool {
        self.is_method
    }
}

/// Result of a lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<V> {
    /// Identity field, never cached
    Builtin(String),
    Value(V),
}

/// What commit did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub written: Vec<String>,
    pub unchanged: Vec<String>,
}

/// Variable cache scoped to exactly one run and one transaction
pub struct VariableStateCache<V> {
    builtins: Builtins,
    limits: CacheLimits,
    transaction: RefCell<Option<Box<dyn VariableTransaction>>>,
    entries: RefCell<BTreeMap<String, CacheEntry<V>>>,
    loading: RefCell<HashSet<String>>,
}

impl<V: Clone> VariableStateCache<V> {
    pub fn new(
        transaction: Box<dyn VariableTransaction>,
        builtins: Builtins,
        limits: CacheLimits,
    ) -> Self {
        Self {
            builtins,
            limits,
            transaction: RefCell::new(Some(transaction)),
            entries: RefCell::new(BTreeMap::new()),
            loading: RefCell::new(HashSet::new()),
        }
    }

    /// Open a transaction on `store` and build a cache over it
    pub fn begin(
        store: &dyn VariableStore,
        builtins: Builtins,
        limits: CacheLimits,
    ) -> StateResult<Self> {
        Ok(Self::new(store.begin()?, builtins, limits))
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Whether `name` is already cached
    pub fn is_cached(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Snapshot kind of a cached entry
    pub fn snapshot_kind(&self, name: &str) -> Option<SnapshotKind> {
        self.entries.borrow().get(name).map(CacheEntry::snapshot_kind)
    }

    /// Resolve a variable, loading it from storage on first access
    pub fn get<H>(&self, name: &str, host: &mut H) -> StateResult<Resolved<V>>
    where
        H: ValueHost<Value = V>,
    {
        if let Some(value) = self.builtins.get(name) {
            return Ok(Resolved::Builtin(value.to_string()));
        }

        if let Some(entry) = self.entries.borrow().get(name) {
            return Ok(Resolved::Value(entry.current.clone()));
        }

        let _loading = LoadingGuard::enter(&self.loading, name)?;

        let record = self
            .with_transaction(|tx| tx.load_for_update(name))?
            .ok_or_else(|| StateError::UndefinedVariable(name.to_string()))?;

        let entry = match record.kind {
            VariableKind::Value => {
                let current = host.decode(name, &record.data)?;
                let original = capture(host, name, &current);
                CacheEntry {
                    current,
                    original,
                    is_method: false,
                }
            }
            VariableKind::Method => CacheEntry {
                current: host.load_method(name, &record.data, record.version)?,
                original: Snapshot::None,
                is_method: true,
            },
        };

        tracing::trace!(
            variable = name,
            method = entry.is_method,
            snapshot = ?entry.original.kind(),
            "Loaded variable"
        );

        // the method body may have assigned this name while loading
        let mut entries = self.entries.borrow_mut();
        let current = entries
            .entry(name.to_string())
            .or_insert(entry)
            .current
            .clone();
        Ok(Resolved::Value(current))
    }

    /// Assign a variable; the load-time snapshot is never touched
    pub fn set(&self, name: &str, value: V) -> StateResult<()> {
        if Builtins::is_builtin(name) {
            return Err(StateError::ReadOnly(name.to_string()));
        }

        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(name) {
            Some(entry) => {
                entry.current = value;
                entry.is_method = false;
            }
            None => {
                entries.insert(
                    name.to_string(),
                    CacheEntry {
                        current: value,
                        original: Snapshot::None,
                        is_method: false,
                    },
                );
            }
        }
        Ok(())
    }

    /// Write every changed value and commit the transaction
    ///
    /// On error nothing is committed; the transaction rolls back when the
    /// cache is dropped.
    pub fn commit<H>(&self, host: &mut H) -> StateResult<CommitReport>
    where
        H: ValueHost<Value = V>,
    {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        let mut report = CommitReport::default();

        for (name, entry) in entries {
            if entry.is_method {
                continue;
            }

            if is_unchanged(host, &entry) {
                tracing::debug!(variable = %name, "Variable unchanged, skipping write");
                report.unchanged.push(name);
                continue;
            }

            self.store(host, &name, &entry.current)?;
            tracing::debug!(variable = %name, "Variable written");
            report.written.push(name);
        }

        let transaction = self
            .transaction
            .borrow_mut()
            .take()
            .ok_or(StateError::TransactionFinished)?;
        transaction.commit()?;

        Ok(report)
    }

    /// Discard all changes
    pub fn rollback(&self) {
        self.entries.borrow_mut().clear();
        self.transaction.borrow_mut().take();
    }

    fn store<H>(&self, host: &mut H, name: &str, value: &V) -> StateResult<()>
    where
        H: ValueHost<Value = V>,
    {
        if name.len() > self.limits.max_name_length {
            return Err(StateError::storage(format!("variable name '{}' is too long", name)));
        }

        let data = host.encode(value).map_err(|e| saving(name, e))?;
        if data.len() > self.limits.max_payload_bytes {
            return Err(StateError::storage(format!(
                "variable '{}' exceeds maximum size of {} bytes",
                name, self.limits.max_payload_bytes
            )));
        }

        self.with_transaction(|tx| tx.upsert(&VariableRecord::value(name, data)))
    }

    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn VariableTransaction) -> StateResult<T>,
    ) -> StateResult<T> {
        let mut transaction = self.transaction.borrow_mut();
        let tx = transaction.as_mut().ok_or(StateError::TransactionFinished)?;
        f(tx.as_mut())
    }
}

fn capture<H: ValueHost>(host: &mut H, name: &str, value: &H::Value) -> Snapshot {
    let snapshot = match host.canonical_form(value) {
        Ok(Some(text)) => Ok(Snapshot::Serialized(text)),
        Ok(None) => host.structural_clone(value).map(Snapshot::Structural),
        Err(e) => Err(e),
    };

    snapshot.unwrap_or_else(|e| {
        tracing::debug!(variable = name, error = %e, "Could not snapshot variable");
        Snapshot::None
    })
}

fn is_unchanged<H: ValueHost>(host: &mut H, entry: &CacheEntry<H::Value>) -> bool {
    match &entry.original {
        Snapshot::None => false,
        Snapshot::Serialized(original) => matches!(
            host.canonical_form(&entry.current),
            Ok(Some(current)) if &current == original
        ),
        Snapshot::Structural(original) => host
            .structural_clone(&entry.current)
            .is_ok_and(|current| values_equal(original, &current)),
    }
}

fn saving(name: &str, err: StateError) -> StateError {
    match err {
        StateError::StorageFault(message) => {
            StateError::StorageFault(format!("error saving '{}': {}", name, message))
        }
        other => other,
    }
}

/// Marks a name as loading for the lifetime of the guard
struct LoadingGuard<'a> {
    loading: &'a RefCell<HashSet<String>>,
    name: String,
}

impl<'a> LoadingGuard<'a> {
    fn enter(loading: &'a RefCell<HashSet<String>>, name: &str) -> StateResult<Self> {
        if !loading.borrow_mut().insert(name.to_string()) {
            return Err(StateError::CircularVariableDependency(name.to_string()));
        }
        Ok(Self {
            loading,
            name: name.to_string(),
        })
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.borrow_mut().remove(&self.name);
    }
}
