//! Configuration for the persistence layer
//!
//! This module provides the configuration structure that selects a store
//! backend and tunes envelope versioning, backup retention, quota estimation
//! and the names of the application collections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Schema version written into every envelope
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Prefix of every backup key: `{prefix}{key}_{millis}`
pub const DEFAULT_BACKUP_PREFIX: &str = "taskapp_backup_";

/// Number of backups kept per key
pub const DEFAULT_BACKUP_RETENTION: usize = 5;

/// Assumed namespace quota: 5 MiB of UTF-16 code units
pub const DEFAULT_QUOTA: usize = 5 * 1024 * 1024;

/// Usage percentage above which the namespace counts as nearly full
pub const DEFAULT_NEAR_LIMIT_PERCENT: f64 = 80.0;

/// Enumeration of supported store backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBackend {
    /// In-process namespace, lost on exit
    Memory,
    /// Single JSON document on the local filesystem
    File,
}

/// Which keys the usage estimator counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UsageScope {
    /// Every key in the namespace, including ones other applications own
    #[default]
    Namespace,
    /// Only the configured collection keys and their backups
    Owned,
}

/// Storage keys of the application collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionKeys {
    pub tasks: String,
    pub categories: String,
    pub settings: String,
}

impl Default for CollectionKeys {
    fn default() -> Self {
        Self {
            tasks: "tasks".to_string(),
            categories: "task_categories".to_string(),
            settings: "taskapp_settings".to_string(),
        }
    }
}

impl CollectionKeys {
    /// All collection keys in export order
    pub fn all(&self) -> [&str; 3] {
        [&self.tasks, &self.categories, &self.settings]
    }
}

/// Configuration structure for the persistence layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// The store backend to use
    pub backend: StorageBackend,
    /// Path of the namespace document (required for the file backend)
    pub file_path: Option<PathBuf>,
    /// Schema version stamped on new envelopes
    pub schema_version: u32,
    /// Prefix for backup keys
    pub backup_prefix: String,
    /// Backups kept per key; 0 disables backups
    pub backup_retention: usize,
    /// Quota assumed by the usage estimator, in UTF-16 code units
    pub quota: usize,
    /// Whether adapters reject writes that would exceed `quota`
    pub enforce_quota: bool,
    /// Threshold for `is_storage_near_limit`
    pub near_limit_percent: f64,
    /// Keys counted by the usage estimator
    pub usage_scope: UsageScope,
    /// Names of the application collections
    pub keys: CollectionKeys,
}

impl StoreConfig {
    /// Create a default configuration backed by memory
    pub fn default_memory() -> Self {
        StoreConfig {
            backend: StorageBackend::Memory,
            file_path: None,
            schema_version: CURRENT_SCHEMA_VERSION,
            backup_prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            backup_retention: DEFAULT_BACKUP_RETENTION,
            quota: DEFAULT_QUOTA,
            enforce_quota: false,
            near_limit_percent: DEFAULT_NEAR_LIMIT_PERCENT,
            usage_scope: UsageScope::Namespace,
            keys: CollectionKeys::default(),
        }
    }

    /// Create a configuration for a namespace document at `path`
    ///
    /// File stores enforce the quota, the way a browser does.
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        StoreConfig {
            backend: StorageBackend::File,
            file_path: Some(path.into()),
            enforce_quota: true,
            ..Self::default_memory()
        }
    }

    /// Set the number of backups kept per key
    pub fn with_backup_retention(mut self, retention: usize) -> Self {
        self.backup_retention = retention;
        self
    }

    /// Set the usage estimator scope
    pub fn with_usage_scope(mut self, scope: UsageScope) -> Self {
        self.usage_scope = scope;
        self
    }

    /// Set the assumed quota
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = quota;
        self
    }

    /// Quota the store adapter should enforce, if any
    pub fn store_quota(&self) -> Option<usize> {
        self.enforce_quota.then_some(self.quota)
    }

    /// True when `key` is one of the collections or a backup of anything
    pub fn owns_key(&self, key: &str) -> bool {
        key.starts_with(&self.backup_prefix) || self.keys.all().contains(&key)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.backup_prefix.is_empty() {
            return Err(crate::TaskflowError::validation(
                "backup_prefix cannot be empty",
            ));
        }
        if self.quota == 0 {
            return Err(crate::TaskflowError::validation("quota must be positive"));
        }
        if !(0.0..=100.0).contains(&self.near_limit_percent) {
            return Err(crate::TaskflowError::validation(format!(
                "near_limit_percent must be within 0..=100, got {}",
                self.near_limit_percent
            )));
        }
        let keys = self.keys.all();
        if keys.iter().any(|k| k.is_empty()) {
            return Err(crate::TaskflowError::validation(
                "collection keys cannot be empty",
            ));
        }
        if keys.iter().any(|k| k.starts_with(&self.backup_prefix)) {
            return Err(crate::TaskflowError::validation(
                "collection keys cannot start with the backup prefix",
            ));
        }
        if self.backend == StorageBackend::File && self.file_path.is_none() {
            return Err(crate::TaskflowError::validation(
                "File backend requires a file path",
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::default_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_memory_config() {
        let config = StoreConfig::default_memory();
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.backup_prefix, "taskapp_backup_");
        assert_eq!(config.backup_retention, 5);
        assert_eq!(config.quota, 5 * 1024 * 1024);
        assert_eq!(config.store_quota(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_config_enforces_quota() {
        let config = StoreConfig::file("/tmp/store.json");
        assert_eq!(config.backend, StorageBackend::File);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/store.json")));
        assert_eq!(config.store_quota(), Some(DEFAULT_QUOTA));
    }

    #[test]
    fn test_owns_key() {
        let config = StoreConfig::default_memory();
        assert!(config.owns_key("tasks"));
        assert!(config.owns_key("task_categories"));
        assert!(config.owns_key("taskapp_backup_tasks_1700000000000"));
        assert!(!config.owns_key("theme-mode"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = StoreConfig::default_memory();
        config.backup_prefix = String::new();
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default_memory();
        config.near_limit_percent = 120.0;
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default_memory();
        config.keys.tasks = "taskapp_backup_tasks".to_string();
        assert!(config.validate().is_err());

        let mut config = StoreConfig::default_memory();
        config.backend = StorageBackend::File;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = StoreConfig::file("store.json").with_backup_retention(3);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.backup_retention, 3);
        assert_eq!(parsed.keys, CollectionKeys::default());
    }
}
