//! Vulnerability records produced by the source collaborator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One vulnerability as reported by the scanner.
///
/// An opaque mapping of field name to value; the engine never interprets
/// individual fields, templates do. Identity is caller-defined (e.g. an
/// `id` field), and records are immutable once retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VulnerabilityRecord {
    fields: Map<String, Value>,
}

impl VulnerabilityRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build from a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Look up a top-level field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The record as a JSON object, for template contexts.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
