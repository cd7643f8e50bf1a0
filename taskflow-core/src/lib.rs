/*!
# TaskFlow Core

Local-first persistence for the TaskFlow task manager.

All application state lives in a flat string key-value namespace, the shape
of browser local storage. This crate layers on top of it:

- A versioned envelope `{version, timestamp, data}` around every value
- Rolling backups of every key, pruned to a retention count
- Recovery from the newest backup when a primary entry is corrupted
- Quota usage estimation with a "near limit" flag
- Export/import of the task, category and settings collections
- A task repository with ordering, filtering and statistics

## Architecture

Storage is a port: [`KeyValueStore`]. [`MemoryStore`] and [`FileStore`] are
the adapters shipped here; anything else (a browser bridge, an embedded
database) only needs `get`, `set`, `remove` and `keys`.

## Usage

```rust
use taskflow_core::{MemoryStore, NewTask, PersistentStore, StoreConfig, TaskRepository};

let store = PersistentStore::new(MemoryStore::new(), StoreConfig::default_memory());
let tasks = TaskRepository::new(&store);
tasks.create(NewTask::new("Buy milk"))?;

let export = store.export_data();
assert_eq!(export.task_count, 1);

let document = serde_json::to_value(&export)?;
assert!(store.import_data(&document, true));
assert_eq!(tasks.list().len(), 2);
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod backup;
pub mod clock;
pub mod compression;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod migration;
pub mod observability;
pub mod repository;
pub mod store;
pub mod task;
pub mod transfer;
pub mod usage;


pub use backup::RotationOutcome;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compression::{CompressionAdapter, GzipCompressor, NoCompression};
pub use config::{CollectionKeys, StorageBackend, StoreConfig, UsageScope};
pub use engine::PersistentStore;
pub use envelope::{BackupEntry, StorageEnvelope};
pub use error::{Result, TaskflowError};
pub use migration::{IdentityMigrator, MigrationRegistry, SchemaMigrator};
#[cfg(feature = "metrics")]
pub use observability::TaskflowMetrics;
pub use observability::{
    init_default_observability, init_observability, init_observability_with_filter,
};
pub use repository::TaskRepository;
pub use store::{create_store_from_config, FileStore, KeyValueStore, MemoryStore};
pub use task::{
    Category, CategoryRecord, NewTask, Priority, Status, Task, TaskFilter, TaskPatch, TaskStats,
};
pub use transfer::{read_export_file, ExportDocument, ImportSummary};
pub use usage::UsageReport;
