//! Host-independent value trees and the equality engine
//!
//! A [`ScriptValue`] is a detached copy of a script value over a closed set
//! of kinds. Snapshots taken at load time are compared against a fresh copy
//! of the current value at commit time.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value as JsonValue};

use crate::error::{StateError, StateResult};

/// Nesting limit for snapshots; deeper values are treated as unsnapshottable
pub const MAX_SNAPSHOT_DEPTH: usize = 64;

/// A detached script value
#[derive(Debug, Clone)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ScriptValue>),
    Object(ObjectValue),
    /// Functions, symbols and anything else without a structural form.
    /// The label is only for diagnostics.
    Opaque(String),
}

/// An object's own enumerable entries plus its canonical serialization, if
/// the object exposes a serialization hook
#[derive(Debug, Clone, Default)]
pub struct ObjectValue {
    pub entries: BTreeMap<String, ScriptValue>,
    pub canonical: Option<String>,
}

impl ObjectValue {
    pub fn new(entries: BTreeMap<String, ScriptValue>) -> Self {
        Self {
            entries,
            canonical: None,
        }
    }

    pub fn with_canonical(mut self, canonical: impl Into<String>) -> Self {
        self.canonical = Some(canonical.into());
        self
    }

    pub fn has_hook(&self) -> bool {
        self.canonical.is_some()
    }
}

/// Structural equality used by the commit-time dirty check
///
/// Arrays compare element-wise in order. Objects compare by canonical
/// serialization when both have a hook, by unordered entries when neither
/// has one, and are never equal when only one side has one. Opaque values
/// are never equal to anything.
pub fn values_equal(a: &ScriptValue, b: &ScriptValue) -> bool {
    match (a, b) {
        (ScriptValue::Null, ScriptValue::Null) => true,
        (ScriptValue::Bool(x), ScriptValue::Bool(y)) => x == y,
        (ScriptValue::Number(x), ScriptValue::Number(y)) => x == y,
        (ScriptValue::String(x), ScriptValue::String(y)) => x == y,
        (ScriptValue::Array(x), ScriptValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (ScriptValue::Object(x), ScriptValue::Object(y)) => objects_equal(x, y),
        _ => false,
    }
}

fn objects_equal(x: &ObjectValue, y: &ObjectValue) -> bool {
    match (&x.canonical, &y.canonical) {
        (Some(l), Some(r)) => l == r,
        (None, None) => {
            x.entries.len() == y.entries.len()
                && x.entries.iter().all(|(key, value)| {
                    y.entries
                        .get(key)
                        .is_some_and(|other| values_equal(value, other))
                })
        }
        // hidden state on one side cannot be proven equal
        _ => false,
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

impl ScriptValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Null => "null",
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Array(_) => "array",
            ScriptValue::Object(_) => "object",
            ScriptValue::Opaque(_) => "opaque",
        }
    }

    /// Build a tree from parsed JSON
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ScriptValue::Null,
            JsonValue::Bool(b) => ScriptValue::Bool(*b),
            JsonValue::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => ScriptValue::String(s.clone()),
            JsonValue::Array(items) => {
                ScriptValue::Array(items.iter().map(ScriptValue::from_json).collect())
            }
            JsonValue::Object(map) => ScriptValue::Object(ObjectValue::new(
                map.iter()
                    .map(|(k, v)| (k.clone(), ScriptValue::from_json(v)))
                    .collect(),
            )),
        }
    }

    /// Convert to JSON; objects with a hook contribute their canonical text
    pub fn to_json(&self) -> StateResult<JsonValue> {
        Ok(match self {
            ScriptValue::Null => JsonValue::Null,
            ScriptValue::Bool(b) => JsonValue::Bool(*b),
            // JSON has no NaN/Infinity; mirror JSON.stringify and write null
            ScriptValue::Number(n) => Number::from_f64(*n).map_or(JsonValue::Null, JsonValue::Number),
            ScriptValue::String(s) => JsonValue::String(s.clone()),
            ScriptValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(ScriptValue::to_json)
                    .collect::<StateResult<Vec<_>>>()?,
            ),
            ScriptValue::Object(object) => match &object.canonical {
                Some(text) => serde_json::from_str(text)?,
                None => {
                    let mut map = Map::new();
                    for (key, value) in &object.entries {
                        map.insert(key.clone(), value.to_json()?);
                    }
                    JsonValue::Object(map)
                }
            },
            ScriptValue::Opaque(label) => {
                return Err(StateError::storage(format!("cannot serialize {}", label)))
            }
        })
    }
}
