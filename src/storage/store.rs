//! In-memory key/value store.
//!
//! Deliberately not thread-safe: all synchronization lives in the
//! [`StorageService`](crate::storage::StorageService), which serializes
//! access behind a reader/writer lock.

use crate::protocol::RespValue;
use std::collections::HashMap;

/// A plain mapping from string keys to RESP2 values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: HashMap<String, RespValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Looks up a key. A miss is not an error.
    pub fn get(&self, key: &str) -> Option<&RespValue> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: String, value: RespValue) {
        self.data.insert(key, value);
    }

    /// Removes a key. Deleting an absent key is a no-op.
    pub fn delete(&mut self, key: &str) {
        self.data.remove(key);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over all live pairs, each exactly once, in no particular
    /// order. Not valid across concurrent mutation.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &RespValue)> {
        self.data.iter()
    }
}
