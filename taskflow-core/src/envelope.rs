/*!
Versioned envelope wrapped around every persisted value, and the naming
scheme of backup entries.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Wrapper written under every key: `{"version", "timestamp", "data"}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageEnvelope<T> {
    /// Schema version the data was written with
    pub version: u32,
    /// When the envelope was written
    pub timestamp: DateTime<Utc>,
    /// The persisted value
    pub data: T,
}

impl<T> StorageEnvelope<T> {
    pub fn new(version: u32, timestamp: DateTime<Utc>, data: T) -> Self {
        Self {
            version,
            timestamp,
            data,
        }
    }
}

impl<T: Serialize> StorageEnvelope<T> {
    /// Serialize to the text stored in the namespace
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl StorageEnvelope<Value> {
    /// Parse stored text; fails on malformed JSON or a missing envelope field
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// `data` must be present and structured (an object or an array)
    pub fn has_structured_data(&self) -> bool {
        matches!(self.data, Value::Object(_) | Value::Array(_))
    }
}

/// A backup of one key, identified by its millisecond suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Full storage key of the backup
    pub storage_key: String,
    /// Unix milliseconds embedded in the key
    pub stamp: i64,
}

impl BackupEntry {
    /// Build the entry for `key` at `stamp` under `prefix`
    pub fn new(prefix: &str, key: &str, stamp: i64) -> Self {
        Self {
            storage_key: format!("{prefix}{key}_{stamp}"),
            stamp,
        }
    }

    /// Recognize `storage_key` as a backup of `key`
    ///
    /// The suffix after `{prefix}{key}_` must be a bare integer, so backups of
    /// `tasks_archive` are never mistaken for backups of `tasks`.
    pub fn parse(prefix: &str, key: &str, storage_key: &str) -> Option<Self> {
        let suffix = storage_key
            .strip_prefix(prefix)?
            .strip_prefix(key)?
            .strip_prefix('_')?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let stamp = suffix.parse().ok()?;
        Some(Self {
            storage_key: storage_key.to_string(),
            stamp,
        })
    }

    /// When the backup was taken
    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.stamp)
    }
}
