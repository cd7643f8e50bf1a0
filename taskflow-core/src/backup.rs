/*!
Backup rotation and recovery.

Every successful save copies the new envelope to
`{backup_prefix}{key}_{unix_millis}` and prunes that key's backups down to
the configured retention. Recovery reads only the newest backup.
*/

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::PersistentStore;
use crate::envelope::{BackupEntry, StorageEnvelope};
use crate::observability::record;
use crate::store::KeyValueStore;
use crate::{Result, TaskflowError};

/// What a rotation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    pub written: BackupEntry,
    pub pruned: usize,
}

impl<S> PersistentStore<S>
where
    S: KeyValueStore,
{
    /// Backups of `key`, newest first
    pub fn list_backups(&self, key: &str) -> Result<Vec<BackupEntry>> {
        let prefix = &self.config.backup_prefix;
        let mut backups: Vec<BackupEntry> = self
            .store
            .keys()?
            .iter()
            .filter_map(|storage_key| BackupEntry::parse(prefix, key, storage_key))
            .collect();
        backups.sort_by(|a, b| b.stamp.cmp(&a.stamp));
        Ok(backups)
    }

    /// Take a backup of freshly saved `text`, logging instead of failing
    pub(crate) fn rotate_backups(&self, key: &str, text: &str) {
        if self.config.backup_retention == 0 {
            return;
        }
        match self.try_rotate_backups(key, text) {
            Ok(outcome) => debug!(
                key,
                backup = %outcome.written.storage_key,
                pruned = outcome.pruned,
                "Rotated backups"
            ),
            Err(e) => warn!(key, error = %e, "Failed to write backup"),
        }
    }

    /// Write a backup of `text` for `key` and prune beyond retention
    ///
    /// The backup stamp is the current time in milliseconds, bumped past the
    /// newest existing backup so rapid saves never overwrite each other.
    /// Individual prune failures are logged and skipped.
    pub fn try_rotate_backups(&self, key: &str, text: &str) -> Result<RotationOutcome> {
        let existing = self.list_backups(key)?;

        let now = self.clock.now_millis();
        let stamp = match existing.first() {
            Some(newest) => newest
                .stamp
                .checked_add(1)
                .ok_or_else(|| {
                    TaskflowError::storage(format!(
                        "Backup stamp overflow past '{}'",
                        newest.storage_key
                    ))
                })?
                .max(now),
            None => now,
        };
        let written = BackupEntry::new(&self.config.backup_prefix, key, stamp);

        self.store.set(&written.storage_key, text)?;
        record::backup_written();

        // `existing` is newest first and the new entry is newer than all of it
        let keep_from_existing = self.config.backup_retention.saturating_sub(1);
        let mut pruned = 0;
        for stale in existing.iter().skip(keep_from_existing) {
            match self.store.remove(&stale.storage_key) {
                Ok(()) => pruned += 1,
                Err(e) => warn!(backup = %stale.storage_key, error = %e, "Failed to prune backup"),
            }
        }
        record::backups_pruned(pruned);

        Ok(RotationOutcome { written, pruned })
    }

    /// Data of the newest backup of `key`, `None` when there is none or it
    /// cannot be parsed
    pub fn restore_from_backup(&self, key: &str) -> Option<Value> {
        self.read_newest_backup(key)
            .map_err(|e| warn!(key, error = %e, "Backup recovery failed"))
            .ok()
            .flatten()
            .map(|(_, data)| data)
    }

    /// Typed variant of [`restore_from_backup`](Self::restore_from_backup)
    pub fn restore_from_backup_as<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let data = self.restore_from_backup(key)?;
        serde_json::from_value(data)
            .map_err(|e| warn!(key, error = %e, "Backup data has the wrong shape"))
            .ok()
    }

    /// Overwrite the primary entry of `key` with its newest backup
    ///
    /// The backup's envelope is copied verbatim, keeping its original
    /// timestamp and version. Returns the restored data.
    ///
    /// # Errors
    /// * `TaskflowError::NotFound` - If `key` has no backups
    /// * `TaskflowError::Json` - If the newest backup cannot be parsed
    pub fn restore_primary(&self, key: &str) -> Result<Value> {
        let (entry, data) = self
            .read_newest_backup(key)?
            .ok_or_else(|| TaskflowError::not_found(format!("No backups for '{key}'")))?;

        let text = self
            .store
            .get(&entry.storage_key)?
            .ok_or_else(|| TaskflowError::not_found(entry.storage_key.clone()))?;
        self.store.set(key, &text)?;

        info!(key, backup = %entry.storage_key, "Restored primary entry from backup");
        Ok(data)
    }

    fn read_newest_backup(&self, key: &str) -> Result<Option<(BackupEntry, Value)>> {
        let Some(newest) = self.list_backups(key)?.into_iter().next() else {
            debug!(key, "No backups available");
            return Ok(None);
        };

        let Some(text) = self.store.get(&newest.storage_key)? else {
            return Ok(None);
        };
        let envelope = StorageEnvelope::decode(&text)?;
        let data = self.upgrade(key, envelope)?;
        Ok(Some((newest, data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    const START: i64 = 1_700_000_000_000;

    fn create_test_store() -> (PersistentStore<MemoryStore>, MemoryStore, Arc<ManualClock>) {
        let raw = MemoryStore::new();
        let clock = Arc::new(ManualClock::at_millis(START));
        let store =
            PersistentStore::new(raw.clone(), StoreConfig::default_memory()).with_clock(clock.clone());
        (store, raw, clock)
    }

    #[test]
    fn test_each_save_writes_a_backup() {
        let (store, raw, _) = create_test_store();
        assert!(store.save("tasks", &json!([1])));

        let backups = store.list_backups("tasks").unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].storage_key, format!("taskapp_backup_tasks_{START}"));
        assert_eq!(
            raw.get(&backups[0].storage_key).unwrap(),
            raw.get("tasks").unwrap()
        );
    }

    #[test]
    fn test_retention_keeps_most_recent_saves() {
        let (store, raw, clock) = create_test_store();

        for i in 0..8 {
            assert!(store.save("tasks", &json!([i])));
            clock.advance(Duration::seconds(1));
        }

        let backups = store.list_backups("tasks").unwrap();
        assert_eq!(backups.len(), 5);

        let saved: Vec<Value> = backups
            .iter()
            .map(|b| {
                let text = raw.get(&b.storage_key).unwrap().unwrap();
                StorageEnvelope::decode(&text).unwrap().data
            })
            .collect();
        assert_eq!(
            saved,
            vec![json!([7]), json!([6]), json!([5]), json!([4]), json!([3])]
        );
    }

    #[test]
    fn test_same_millisecond_saves_do_not_collide() {
        let (store, _, _) = create_test_store();

        for i in 0..3 {
            store.try_save("tasks", &json!([i])).unwrap();
        }

        let stamps: Vec<i64> = store
            .list_backups("tasks")
            .unwrap()
            .iter()
            .map(|b| b.stamp)
            .collect();
        assert_eq!(stamps, vec![START + 2, START + 1, START]);
    }

    #[test]
    fn test_maximal_foreign_stamp_does_not_fail_save() {
        let (store, raw, _) = create_test_store();
        let foreign = format!("taskapp_backup_tasks_{}", i64::MAX);
        raw.set(&foreign, "not ours").unwrap();

        assert!(store.save("tasks", &json!([{"id": "1"}])));
        assert_eq!(
            store.try_load::<Value>("tasks").unwrap(),
            Some(json!([{"id": "1"}]))
        );

        assert!(store.try_rotate_backups("tasks", "{}").is_err());
        let keys: Vec<String> = store
            .list_backups("tasks")
            .unwrap()
            .into_iter()
            .map(|b| b.storage_key)
            .collect();
        assert_eq!(keys, vec![foreign]);
    }

    #[test]
    fn test_backups_are_per_key() {
        let (store, _, _) = create_test_store();
        store.try_save("tasks", &json!([])).unwrap();
        store.try_save("tasks_archive", &json!([])).unwrap();
        store.try_save("tasks_archive", &json!([])).unwrap();

        assert_eq!(store.list_backups("tasks").unwrap().len(), 1);
        assert_eq!(store.list_backups("tasks_archive").unwrap().len(), 2);
    }

    #[test]
    fn test_zero_retention_disables_backups() {
        let raw = MemoryStore::new();
        let store = PersistentStore::new(
            raw.clone(),
            StoreConfig::default_memory().with_backup_retention(0),
        );
        store.try_save("tasks", &json!([])).unwrap();
        assert_eq!(raw.keys().unwrap(), vec!["tasks"]);
    }

    #[test]
    fn test_load_recovers_from_corrupted_primary() {
        let (store, raw, clock) = create_test_store();
        store.try_save("tasks", &json!([{"id": "old"}])).unwrap();
        clock.advance(Duration::seconds(1));
        store.try_save("tasks", &json!([{"id": "new"}])).unwrap();

        raw.set("tasks", "{corrupted").unwrap();

        let loaded: Value = store.load("tasks", json!([]));
        assert_eq!(loaded, json!([{"id": "new"}]));
    }

    #[test]
    fn test_recovery_uses_only_the_newest_backup() {
        let (store, raw, clock) = create_test_store();
        store.try_save("tasks", &json!([{"id": "old"}])).unwrap();
        clock.advance(Duration::seconds(1));
        store.try_save("tasks", &json!([{"id": "new"}])).unwrap();

        let newest = store.list_backups("tasks").unwrap()[0].storage_key.clone();
        raw.set(&newest, "garbage").unwrap();
        raw.set("tasks", "garbage").unwrap();

        assert_eq!(store.restore_from_backup("tasks"), None);
        assert_eq!(store.load("tasks", json!("default")), json!("default"));
    }

    #[test]
    fn test_restore_without_backups() {
        let (store, raw, _) = create_test_store();
        raw.set("tasks", "garbage").unwrap();
        assert_eq!(store.restore_from_backup("tasks"), None);
        assert!(matches!(
            store.restore_primary("tasks"),
            Err(TaskflowError::NotFound(_))
        ));
    }

    #[test]
    fn test_restore_primary_copies_backup_envelope() {
        let (store, raw, _) = create_test_store();
        store.try_save("tasks", &json!([{"id": "1"}])).unwrap();
        raw.set("tasks", "garbage").unwrap();

        let data = store.restore_primary("tasks").unwrap();
        assert_eq!(data, json!([{"id": "1"}]));
        assert_eq!(
            store.try_load::<Value>("tasks").unwrap(),
            Some(json!([{"id": "1"}]))
        );
    }
}
