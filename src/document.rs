//! Document model used by the in-memory driver.
//!
//! - **Document**: an ordered map of field names to values
//! - **DocumentId**: store-assigned identifier, unique per store
//! - **Value**: the scalar values a field can hold

pub mod value;

pub use value::Value;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier assigned to a document when it is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl DocumentId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A schemaless record: field name to value. Serializes as a plain object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Copies every field of `changes` over this document.
    pub fn merge(&mut self, changes: &Document) {
        for (field, value) in &changes.fields {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// Returns true if `field` is present and equal to `value`.
    pub fn matches(&self, field: &str, value: &Value) -> bool {
        self.fields.get(field) == Some(value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}
