/*!
Key-value store port and adapters.

The persistence layer never touches a concrete storage API directly. It talks
to a [`KeyValueStore`], which models a flat string-to-string namespace in the
shape of browser local storage: `get`, `set`, `remove` and key enumeration.
Two adapters ship with the crate:

- [`MemoryStore`]: in-process namespace with an optional quota, used by tests
  and embedders that bring their own durability.
- [`FileStore`]: the whole namespace kept in one JSON document on disk and
  rewritten atomically on every mutation.
*/

pub mod file;
pub mod memory;

use crate::config::{StorageBackend, StoreConfig};
use crate::{Result, TaskflowError};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage abstraction over a flat string namespace
///
/// All methods take `&self`; adapters use interior mutability. Writers are
/// last-write-wins, nothing is locked across calls.
#[cfg_attr(test, mockall::automock)]
pub trait KeyValueStore {
    /// Read the raw text stored under `key`, `None` when absent
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    ///
    /// # Errors
    /// * `TaskflowError::QuotaExceeded` - If the namespace cannot hold the value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing an absent key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every key in the namespace
    fn keys(&self) -> Result<Vec<String>>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }
}

/// Length of `text` in UTF-16 code units, the unit browsers charge quota in
pub fn text_units(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Check that replacing `key` with `value` keeps the namespace within `quota`
///
/// `entries` yields every `(key, value)` currently stored.
pub(crate) fn ensure_capacity<'a, I>(
    entries: I,
    key: &str,
    value: &str,
    quota: Option<usize>,
) -> Result<()>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let Some(quota) = quota else {
        return Ok(());
    };

    let used: usize = entries
        .into_iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| text_units(k) + text_units(v))
        .sum();
    let required = text_units(key) + text_units(value);
    let available = quota.saturating_sub(used);

    if required > available {
        return Err(TaskflowError::QuotaExceeded {
            key: key.to_string(),
            required,
            available,
        });
    }
    Ok(())
}

/// Create a store adapter based on configuration
///
/// # Example
/// ```rust,no_run
/// use taskflow_core::{create_store_from_config, StoreConfig};
///
/// let store = create_store_from_config(&StoreConfig::file("./taskflow-store.json"))?;
/// # Ok::<(), taskflow_core::TaskflowError>(())
/// ```
pub fn create_store_from_config(config: &StoreConfig) -> Result<Box<dyn KeyValueStore + Send + Sync>> {
    config.validate()?;

    match config.backend {
        StorageBackend::Memory => Ok(Box::new(MemoryStore::with_quota(config.store_quota()))),
        StorageBackend::File => {
            let path = config.file_path.as_ref().ok_or_else(|| {
                TaskflowError::validation("File backend requires a file path")
            })?;
            Ok(Box::new(FileStore::open_with_quota(path, config.store_quota())?))
        }
    }
}
