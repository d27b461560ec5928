//! Load-time baselines for the dirty check

use crate::value::ScriptValue;

/// How a variable's original value was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// Canonical serialization text
    Serialized,
    /// Detached value tree
    StructuralClone,
    /// No baseline; the variable is always written
    None,
}

/// The captured original value
#[derive(Debug, Clone)]
pub enum Snapshot {
    Serialized(String),
    Structural(ScriptValue),
    None,
}

impl Snapshot {
    pub fn kind(&self) -> SnapshotKind {
        match self {
            Snapshot::Serialized(_) => SnapshotKind::Serialized,
            Snapshot::Structural(_) => SnapshotKind::StructuralClone,
            Snapshot::None => SnapshotKind::None,
        }
    }
}
