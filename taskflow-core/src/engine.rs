/*!
Persistent store engine: the envelope codec and the caller-facing
save/load policy.

[`PersistentStore`] wraps any [`KeyValueStore`] and is the single entry
point of the persistence layer. This module holds the codec; backup
rotation and recovery live in `backup`, usage estimation in `usage` and
export/import in `transfer`, all as further `impl` blocks on the same type.

Two layers of API are exposed:

- `try_*` methods return `Result` and let the caller see every failure.
- `save` / `load` follow the "never fail" policy: errors are logged and
  turned into `false` or the caller's default value.
*/

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::StoreConfig;
use crate::envelope::StorageEnvelope;
use crate::migration::{IdentityMigrator, SchemaMigrator};
use crate::observability::record;
use crate::store::{create_store_from_config, KeyValueStore};
use crate::Result;

/// Versioned, backed-up view over a key-value namespace
///
/// # Example
/// ```rust
/// use taskflow_core::{MemoryStore, PersistentStore, StoreConfig};
/// use serde_json::json;
///
/// let store = PersistentStore::new(MemoryStore::new(), StoreConfig::default_memory());
///
/// assert!(store.save("tasks", &json!([{"id": "1", "title": "Buy milk"}])));
/// let tasks: serde_json::Value = store.load("tasks", json!([]));
/// assert_eq!(tasks[0]["title"], "Buy milk");
/// ```
pub struct PersistentStore<S>
where
    S: KeyValueStore,
{
    pub(crate) store: S,
    pub(crate) config: StoreConfig,
    pub(crate) clock: Box<dyn Clock + Send + Sync>,
    pub(crate) migrator: Box<dyn SchemaMigrator + Send + Sync>,
}

impl<S> PersistentStore<S>
where
    S: KeyValueStore,
{
    /// Wrap `store` using wall-clock time and no schema migrations
    pub fn new(store: S, config: StoreConfig) -> Self {
        Self {
            store,
            config,
            clock: Box::new(SystemClock),
            migrator: Box::new(IdentityMigrator),
        }
    }

    /// Replace the time source
    pub fn with_clock<C: Clock + Send + Sync + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replace the schema migrator
    pub fn with_migrator<M: SchemaMigrator + Send + Sync + 'static>(mut self, migrator: M) -> Self {
        self.migrator = Box::new(migrator);
        self
    }

    /// The underlying namespace
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current time according to the configured clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Wrap `value` in an envelope and write it under `key`
    ///
    /// A backup of the new envelope is taken afterwards; backup problems are
    /// logged and never fail the save.
    ///
    /// # Errors
    /// * `TaskflowError::Json` - If the value cannot be serialized
    /// * `TaskflowError::QuotaExceeded` - If the namespace is full
    /// * `TaskflowError::Storage` - If the store rejects the write
    pub fn try_save<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let envelope = StorageEnvelope::new(self.config.schema_version, self.clock.now(), value);
        let text = envelope.encode()?;

        self.store.set(key, &text)?;
        debug!(key, bytes = text.len(), "Saved envelope");

        self.rotate_backups(key, &text);
        Ok(())
    }

    /// Save `value` under `key`, reporting failure as `false`
    pub fn save<T>(&self, key: &str, value: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match self.try_save(key, value) {
            Ok(()) => {
                record::save(true);
                true
            }
            Err(e) => {
                record::save(false);
                error!(key, error = %e, "Failed to save");
                false
            }
        }
    }

    /// Read and decode the value under `key` without any recovery
    ///
    /// Returns `Ok(None)` when the key is absent, and also when the envelope
    /// carries `null` or scalar data (logged as a warning). Envelopes written
    /// under another schema version are passed through the migrator.
    ///
    /// # Errors
    /// * `TaskflowError::Json` - If the stored text is not a valid envelope or
    ///   its data does not deserialize into `T`
    /// * `TaskflowError::Storage` - If the store cannot be read
    pub fn try_load<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };

        let envelope = StorageEnvelope::decode(&raw)?;
        if !envelope.has_structured_data() {
            warn!(key, "Stored data failed structural validation, using default");
            return Ok(None);
        }

        let data = self.upgrade(key, envelope)?;
        Ok(Some(serde_json::from_value(data)?))
    }

    /// Load the value under `key`, falling back to `default`
    ///
    /// When the primary entry cannot be decoded the newest backup is tried
    /// once; if that fails too, `default` is returned.
    pub fn load<T>(&self, key: &str, default: T) -> T
    where
        T: DeserializeOwned,
    {
        match self.try_load(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                error!(key, error = %e, "Failed to load, attempting backup recovery");
                match self.restore_from_backup_as(key) {
                    Some(value) => {
                        record::recovery(true);
                        warn!(key, "Recovered value from backup");
                        value
                    }
                    None => {
                        record::recovery(false);
                        default
                    }
                }
            }
        }
    }

    /// Apply schema migration when the envelope version is not current
    pub(crate) fn upgrade(&self, key: &str, envelope: StorageEnvelope<Value>) -> Result<Value> {
        let current = self.config.schema_version;
        if envelope.version == current {
            return Ok(envelope.data);
        }

        warn!(
            key,
            stored = envelope.version,
            current,
            "Schema version mismatch"
        );
        self.migrator.migrate(envelope.version, current, envelope.data)
    }
}

impl PersistentStore<Box<dyn KeyValueStore + Send + Sync>> {
    /// Build a store from configuration
    ///
    /// # Example
    /// ```rust
    /// use taskflow_core::{PersistentStore, StoreConfig};
    ///
    /// let store = PersistentStore::open(StoreConfig::default_memory())?;
    /// assert!(store.save("taskapp_settings", &serde_json::json!({"theme": "dark"})));
    /// # Ok::<(), taskflow_core::TaskflowError>(())
    /// ```
    pub fn open(config: StoreConfig) -> Result<Self> {
        let store = create_store_from_config(&config)?;
        Ok(Self::new(store, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::migration::MigrationRegistry;
    use crate::store::{MemoryStore, MockKeyValueStore};
    use crate::TaskflowError;
    use serde::Deserialize;
    use serde_json::json;

    fn create_test_store() -> (PersistentStore<MemoryStore>, MemoryStore) {
        let raw = MemoryStore::new();
        let store = PersistentStore::new(raw.clone(), StoreConfig::default_memory())
            .with_clock(ManualClock::at_millis(1_700_000_000_000));
        (store, raw)
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        title: String,
        tags: Vec<String>,
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (store, _) = create_test_store();
        let note = Note {
            id: "1".to_string(),
            title: "Buy milk".to_string(),
            tags: vec!["errand".to_string()],
        };

        assert!(store.save("note", &note));
        let loaded: Note = store.load(
            "note",
            Note {
                id: String::new(),
                title: String::new(),
                tags: vec![],
            },
        );
        assert_eq!(loaded, note);
    }

    #[test]
    fn test_load_missing_key_returns_default() {
        let (store, _) = create_test_store();
        let default = json!({"fallback": true});
        assert_eq!(store.load("nonexistent-key", default.clone()), default);
    }

    #[test]
    fn test_saved_text_is_an_envelope() {
        let (store, raw) = create_test_store();
        store.try_save("tasks", &json!([1, 2])).unwrap();

        let text = raw.get("tasks").unwrap().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(value["data"], json!([1, 2]));
    }

    #[test]
    fn test_scalar_data_fails_structural_check() {
        let (store, raw) = create_test_store();
        raw.set(
            "tasks",
            r#"{"version":1,"timestamp":"2023-11-14T22:13:20Z","data":null}"#,
        )
        .unwrap();
        assert_eq!(store.try_load::<Value>("tasks").unwrap(), None);

        store.try_save("theme", "dark").unwrap();
        assert_eq!(store.load("theme", "light".to_string()), "light");
    }

    #[test]
    fn test_structural_failure_does_not_use_backups() {
        let (store, raw) = create_test_store();
        store.try_save("tasks", &json!([{"id": "old"}])).unwrap();

        raw.set(
            "tasks",
            r#"{"version":1,"timestamp":"2023-11-14T22:13:20Z","data":42}"#,
        )
        .unwrap();

        let loaded: Value = store.load("tasks", json!([]));
        assert_eq!(loaded, json!([]));
    }

    #[test]
    fn test_malformed_primary_is_an_error_for_try_load() {
        let (store, raw) = create_test_store();
        raw.set("tasks", "{not json").unwrap();
        assert!(matches!(
            store.try_load::<Value>("tasks"),
            Err(TaskflowError::Json(_))
        ));
    }

    #[test]
    fn test_version_mismatch_returns_data_as_is() {
        let (store, raw) = create_test_store();
        raw.set(
            "tasks",
            r#"{"version":0,"timestamp":"2023-11-14T22:13:20Z","data":[{"id":"a"}]}"#,
        )
        .unwrap();

        let loaded: Value = store.load("tasks", json!([]));
        assert_eq!(loaded, json!([{"id": "a"}]));
    }

    #[test]
    fn test_version_mismatch_runs_migrator() {
        let raw = MemoryStore::new();
        let registry = MigrationRegistry::new().register(0, |data| {
            let tasks = data
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|mut t| {
                    t["status"] = json!("todo");
                    t
                })
                .collect();
            Ok(Value::Array(tasks))
        });
        let store =
            PersistentStore::new(raw.clone(), StoreConfig::default_memory()).with_migrator(registry);

        raw.set(
            "tasks",
            r#"{"version":0,"timestamp":"2023-11-14T22:13:20Z","data":[{"id":"a"}]}"#,
        )
        .unwrap();

        let loaded: Value = store.load("tasks", json!([]));
        assert_eq!(loaded, json!([{"id": "a", "status": "todo"}]));
    }

    #[test]
    fn test_save_reports_quota_failure() {
        let raw = MemoryStore::with_quota(Some(64));
        let store = PersistentStore::new(raw.clone(), StoreConfig::default_memory());

        let big = json!({"blob": "x".repeat(200)});
        assert!(!store.save("tasks", &big));
        assert!(matches!(
            store.try_save("tasks", &big),
            Err(TaskflowError::QuotaExceeded { .. })
        ));
        assert_eq!(raw.get("tasks").unwrap(), None);
    }

    #[test]
    fn test_save_survives_backup_write_failure() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_set()
            .withf(|key, _| key == "tasks")
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_set()
            .withf(|key, _| key.starts_with("taskapp_backup_"))
            .returning(|key, _| {
                Err(TaskflowError::QuotaExceeded {
                    key: key.to_string(),
                    required: 10,
                    available: 0,
                })
            });
        mock.expect_keys().returning(|| Ok(vec!["tasks".to_string()]));

        let store = PersistentStore::new(mock, StoreConfig::default_memory());
        assert!(store.save("tasks", &json!([])));
    }

    #[test]
    fn test_load_falls_back_to_default_when_store_unreadable() {
        let mut mock = MockKeyValueStore::new();
        mock.expect_get()
            .returning(|_| Err(TaskflowError::storage("device unavailable")));
        mock.expect_keys()
            .returning(|| Err(TaskflowError::storage("device unavailable")));

        let store = PersistentStore::new(mock, StoreConfig::default_memory());
        assert_eq!(store.load("tasks", json!(["default"])), json!(["default"]));
    }

    #[test]
    fn test_open_from_config() {
        let store = PersistentStore::open(StoreConfig::default_memory()).unwrap();
        assert!(store.save("tasks", &json!([])));
        assert_eq!(store.load("tasks", json!(null)), json!([]));
    }
}
