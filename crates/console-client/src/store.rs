//! Local mirror of the console's keyed state.
//!
//! A key is *known* once a `data` frame has been seen for it. Known keys
//! survive a [`Store::reset`] with no value, so a view can tell "never
//! heard of" apart from "was there before the connection dropped".

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

/// Keyed state applied from `data` and `patch` frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    values: BTreeMap<String, Option<Value>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if loaded.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).and_then(Option::as_ref)
    }

    /// True if `key` has ever received a snapshot.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Known keys, loaded or not.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Loaded keys and their values.
    pub fn loaded(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|value| (key.as_str(), value)))
    }

    /// Replaces the value of `key` wholesale.
    pub fn apply_data(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), Some(value));
    }

    /// Applies an incremental update to `key`.
    ///
    /// Arrays are appended to: an array delta is concatenated and any other
    /// delta is pushed as one element. Objects are shallow-merged with an
    /// object delta. Anything else has no base to patch onto and the delta
    /// is dropped. Returns true if the store changed.
    pub fn apply_patch(&mut self, key: &str, delta: Value) -> bool {
        let Some(Some(current)) = self.values.get_mut(key) else {
            debug!(key = %key, "Patch before snapshot ignored");
            return false;
        };
        match (current, delta) {
            (Value::Array(items), Value::Array(more)) => items.extend(more),
            (Value::Array(items), item) => items.push(item),
            (Value::Object(fields), Value::Object(update)) => {
                for (name, value) in update {
                    fields.insert(name, value);
                }
            }
            _ => {
                debug!(key = %key, "Patch onto a non-container value ignored");
                return false;
            }
        }
        true
    }

    /// Forgets every value but keeps the keys known.
    pub fn reset(&mut self) {
        for value in self.values.values_mut() {
            *value = None;
        }
    }
}
