//! Ordered issue field maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An insertion-ordered mapping of issue field name to value.
///
/// Field order is part of the contract with trackers (some render fields
/// in submission order), so entries keep the order they were inserted in.
/// Values that evaluate to `null` are stored as `null`, never omitted, so
/// subset-by-key filtering stays defined.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap {
    entries: Vec<(String, Value)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. An existing name keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subset-by-key filter: the keys present in both this map and `keys`,
    /// in the order given by `keys`. Unknown keys are dropped, not an
    /// error.
    pub fn filter_by_keys(&self, keys: &[String]) -> FieldMap {
        let mut filtered = FieldMap::new();
        for key in keys {
            if let Some(value) = self.get(key) {
                filtered.insert(key.clone(), value.clone());
            }
        }
        filtered
    }

    /// The map as a JSON object, for predicate contexts.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.entries {
            object.insert(name.clone(), value.clone());
        }
        Value::Object(object)
    }
}

impl FromIterator<(String, Value)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (name, value) in iter {
            map.insert(name, value);
        }
        map
    }
}
