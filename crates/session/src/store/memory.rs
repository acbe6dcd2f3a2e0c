//! In-memory store for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{PersistedStore, StoreError, StoreOp, WriteBatch};

/// [`PersistedStore`] backed by a `HashMap`.
///
/// Cloning shares the underlying map, so a test can keep a handle and inspect
/// what the engine wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `pairs`.
    #[must_use]
    pub fn with_entries<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            entries: Arc::new(Mutex::new(map)),
        }
    }

    /// Synchronous lookup for assertions.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Whether `key` holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[async_trait]
impl PersistedStore for MemoryStore {
    async fn read(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.iter().map(|k| entries.get(*k).cloned()).collect())
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for op in batch.into_ops() {
            match op {
                StoreOp::Set { key, value } => {
                    entries.insert(key, value);
                }
                StoreOp::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
