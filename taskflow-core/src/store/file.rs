/*!
File-backed key-value store adapter.
*/

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{ensure_capacity, KeyValueStore};
use crate::{Result, TaskflowError};

/// Key-value namespace persisted as a single JSON object on disk
///
/// The document is read once on open and rewritten through a temporary file
/// plus rename on every mutation, so a crash never leaves a half-written
/// namespace behind.
///
/// # Example
/// ```rust
/// use taskflow_core::store::{FileStore, KeyValueStore};
///
/// let dir = tempfile::tempdir()?;
/// let store = FileStore::open(dir.path().join("store.json"))?;
/// store.set("theme-mode", "dark")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl FileStore {
    /// Open (or lazily create) the namespace stored at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_quota(path, None)
    }

    /// Open the namespace at `path`, rejecting writes beyond `quota` UTF-16 units
    pub fn open_with_quota<P: AsRef<Path>>(path: P, quota: Option<usize>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| {
                TaskflowError::storage(format!("Failed to read store {}: {}", path.display(), e))
            })?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text).map_err(|e| {
                    TaskflowError::invalid_format(format!(
                        "Store {} is not a JSON object of strings: {}",
                        path.display(),
                        e
                    ))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), keys = entries.len(), "Opened file store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            quota,
        })
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| TaskflowError::storage("File store lock poisoned"))
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self) -> Result<PathBuf> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            fs::create_dir_all(&parent).map_err(|e| {
                TaskflowError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(parent)
    }

    /// Write `entries` to disk atomically
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let parent = self.ensure_parent_dir()?;
        let text = serde_json::to_string_pretty(entries)?;

        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(text.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| {
            TaskflowError::storage(format!(
                "Failed to replace store {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock()?;
        ensure_capacity(entries.iter(), key, value, self.quota)?;

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep memory consistent with what is on disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.lock()?;
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.flush(&entries) {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
