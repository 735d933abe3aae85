//! Per-message metadata sidecar.
//!
//! [`Metadata`] is a string-keyed bag of untyped values that middlewares use
//! to signal each other (business code, HTTP status). The pipeline engine
//! never reads it. An empty store allocates nothing until the first write.

use serde_json::Value;
use std::collections::HashMap;

/// Well-known metadata keys.
pub mod keys {
    /// Business code override read by envelope middlewares.
    pub const BUSINESS_CODE: &str = "business_code";

    /// HTTP status received (client) or to be written (server).
    pub const HTTP_STATUS: &str = "http_status";
}

/// Mutable key/value sidecar attached to a message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: Option<HashMap<String, Value>>,
}

impl Metadata {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self { entries: None }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.as_ref()?.get(key)
    }

    /// Returns the value stored under `key`, or `default` when absent.
    #[must_use]
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).cloned().unwrap_or_else(|| default.into())
    }

    /// Returns the value under `key` as a string, accepting numbers too.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Returns the value under `key` as an unsigned integer, accepting numeric strings.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
    }

    /// Removes and returns the value under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.as_mut()?.remove(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, HashMap::len)
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
