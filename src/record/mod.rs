//! Step records and the append-only record store.
//!
//! One record is created per completed (non-skipped) presentation. The engine
//! always overwrites the reserved fields [`FIELD_LEVEL`], [`FIELD_START_TIME`]
//! and [`FIELD_END_TIME`] before appending — author-supplied values under
//! those names are discarded.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

/// Nesting depth of the completed step.
pub const FIELD_LEVEL: &str = "level";
/// Epoch milliseconds at which the step's content was rendered.
pub const FIELD_START_TIME: &str = "start_time";
/// Epoch milliseconds at which the completion signal was processed.
pub const FIELD_END_TIME: &str = "end_time";

/// A single step record: field name → value. Never mutated after it is
/// appended to a store.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &HashMap<String, Value> {
        &self.fields
    }
}

impl From<HashMap<String, Value>> for Record {
    fn from(fields: HashMap<String, Value>) -> Self {
        Self { fields }
    }
}

/// Append-only sink for step records.
///
/// Implementations must preserve insertion order and accept any field name —
/// reserved fields arrive already overwritten by the engine. The collection
/// may be read at any time, including mid-run.
pub trait RecordStore: Send + Sync {
    fn append(&self, record: Record);

    /// All records so far, in append order.
    fn records(&self) -> Vec<Record>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The records matching `predicate`, in append order.
    fn filtered(&self, predicate: &dyn Fn(&Record) -> bool) -> Vec<Record>;
}

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, record: Record) {
        self.records.write().push(record);
    }

    fn records(&self) -> Vec<Record> {
        self.records.read().clone()
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }

    fn filtered(&self, predicate: &dyn Fn(&Record) -> bool) -> Vec<Record> {
        self.records
            .read()
            .iter()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }
}
