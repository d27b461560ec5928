//! In-memory persistence gateway
//!
//! Row locks are real: a transaction that touches a name blocks any other
//! transaction touching the same name until it commits or is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::StateResult;
use crate::record::VariableRecord;
use crate::store::{VariableStore, VariableTransaction};

#[derive(Default)]
struct Shared {
    records: Mutex<HashMap<String, VariableRecord>>,
    locked: Mutex<HashSet<String>>,
    released: Condvar,
    writes: Mutex<Vec<String>>,
}

/// Variable store backed by a `HashMap`
#[derive(Clone, Default)]
pub struct MemoryVariableStore {
    shared: Arc<Shared>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record outside any transaction
    pub fn insert(&self, record: VariableRecord) {
        self.shared
            .records
            .lock()
            .insert(record.name.clone(), record);
    }

    /// Committed record for `name`
    pub fn get(&self, name: &str) -> Option<VariableRecord> {
        self.shared.records.lock().get(name).cloned()
    }

    /// Number of upserts issued, committed or not
    pub fn write_count(&self) -> usize {
        self.shared.writes.lock().len()
    }

    /// Number of upserts issued for `name`
    pub fn writes_for(&self, name: &str) -> usize {
        self.shared
            .writes
            .lock()
            .iter()
            .filter(|written| written.as_str() == name)
            .count()
    }
}

impl VariableStore for MemoryVariableStore {
    fn begin(&self) -> StateResult<Box<dyn VariableTransaction>> {
        Ok(Box::new(MemoryTransaction {
            shared: self.shared.clone(),
            held: HashSet::new(),
            pending: HashMap::new(),
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    held: HashSet<String>,
    pending: HashMap<String, VariableRecord>,
}

impl MemoryTransaction {
    fn lock_row(&mut self, name: &str) {
        if self.held.contains(name) {
            return;
        }

        let mut locked = self.shared.locked.lock();
        while locked.contains(name) {
            self.shared.released.wait(&mut locked);
        }
        locked.insert(name.to_string());
        self.held.insert(name.to_string());
    }

    fn release(&mut self) {
        if self.held.is_empty() {
            return;
        }

        let mut locked = self.shared.locked.lock();
        for name in self.held.drain() {
            locked.remove(&name);
        }
        self.shared.released.notify_all();
    }
}

impl VariableTransaction for MemoryTransaction {
    fn load_for_update(&mut self, name: &str) -> StateResult<Option<VariableRecord>> {
        self.lock_row(name);

        if let Some(record) = self.pending.get(name) {
            return Ok(Some(record.clone()));
        }
        Ok(self.shared.records.lock().get(name).cloned())
    }

    fn upsert(&mut self, record: &VariableRecord) -> StateResult<()> {
        self.lock_row(&record.name);
        self.shared.writes.lock().push(record.name.clone());
        self.pending.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StateResult<()> {
        {
            let mut records = self.shared.records.lock();
            for (name, record) in self.pending.drain() {
                records.insert(name, record);
            }
        }
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}
