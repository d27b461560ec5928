//! Persistence gateway traits

use crate::error::StateResult;
use crate::record::VariableRecord;

/// Source of variable transactions
///
/// Transactions are synchronous: workers call them from the blocking thread
/// running the interpreter.
pub trait VariableStore: Send + Sync {
    /// Begin a transaction; dropping it without [`VariableTransaction::commit`]
    /// rolls it back
    fn begin(&self) -> StateResult<Box<dyn VariableTransaction>>;
}

/// One run's view of the variables table
pub trait VariableTransaction {
    /// Read a record and lock its row until the transaction ends
    fn load_for_update(&mut self, name: &str) -> StateResult<Option<VariableRecord>>;

    /// Insert or replace a record by name
    fn upsert(&mut self, record: &VariableRecord) -> StateResult<()>;

    fn commit(self: Box<Self>) -> StateResult<()>;
}
