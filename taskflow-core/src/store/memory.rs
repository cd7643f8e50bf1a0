/*!
In-memory key-value store adapter.
*/

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ensure_capacity, KeyValueStore};
use crate::{Result, TaskflowError};

/// Memory-based key-value store
///
/// Clones share the same namespace, so a test can hand one handle to the
/// persistence layer and keep another to inspect or corrupt raw entries.
///
/// # Example
/// ```rust
/// use taskflow_core::store::{KeyValueStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.set("tasks", "[]")?;
/// assert_eq!(store.get("tasks")?, Some("[]".to_string()));
/// # Ok::<(), taskflow_core::TaskflowError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    quota: Option<usize>,
}

impl MemoryStore {
    /// Create an empty, unbounded store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that rejects writes beyond `quota` UTF-16 units
    pub fn with_quota(quota: Option<usize>) -> Self {
        Self {
            entries: Arc::default(),
            quota,
        }
    }

    /// Create a store pre-populated with raw entries
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Arc::new(Mutex::new(map)),
            quota: None,
        }
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// True when no keys are stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| TaskflowError::storage("Memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        ensure_capacity(entries.iter(), key, value, self.quota)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
