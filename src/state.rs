//! Per-user key/value state consumed by stateful pipelines.
//!
//! Backends implement [`KeyValueStore`]; [`MemoryStateStore`] is the
//! process-local implementation used by default.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Get/set contract for per-user state.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads `key` for `user_id`.
    async fn get(&self, user_id: &str, key: &str) -> Option<Value>;

    /// Writes `key` for `user_id`.
    async fn set(&self, user_id: &str, key: &str, value: Value);

    /// Drops every key stored for `user_id`.
    async fn clear(&self, user_id: &str);
}

/// In-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    buckets: Mutex<HashMap<String, Map<String, Value>>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every key stored for `user_id`.
    #[must_use]
    pub fn snapshot(&self, user_id: &str) -> Map<String, Value> {
        self.buckets
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every user's state.
    pub fn clear_all(&self) {
        self.buckets.lock().clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryStateStore {
    async fn get(&self, user_id: &str, key: &str) -> Option<Value> {
        self.buckets
            .lock()
            .get(user_id)
            .and_then(|bucket| bucket.get(key).cloned())
    }

    async fn set(&self, user_id: &str, key: &str, value: Value) {
        self.buckets
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    async fn clear(&self, user_id: &str) {
        self.buckets.lock().remove(user_id);
    }
}
