//! Dictionaries: value→value mappings with structural key equality.

use indexmap::IndexMap;

use super::Value;
use crate::error::{Error, Result};

/// A dictionary value. Keys compare structurally; iteration follows
/// insertion order, but equality between dictionaries ignores it.
#[derive(Debug, Clone, Default)]
pub struct DictValue {
    map: IndexMap<Value, Value, ahash::RandomState>,
}

impl DictValue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Result<Self> {
        let mut dict = Self::new();
        for (key, value) in pairs {
            dict.insert(key, value)?;
        }
        Ok(dict)
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        if matches!(key, Value::Handle(_) | Value::Function(_)) {
            return Err(Error::type_error(format!(
                "a {} cannot be used as a dictionary key",
                key.type_name()
            )));
        }
        self.map.insert(key, value);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.map.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.iter()
    }
}

impl PartialEq for DictValue {
    fn eq(&self, other: &Self) -> bool {
        // IndexMap equality already ignores insertion order.
        self.map == other.map
    }
}
