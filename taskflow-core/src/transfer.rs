/*!
Export and import of the application collections.

An export bundles the `tasks`, `categories` and `settings` collections into
one [`ExportDocument`]. Import accepts any JSON object carrying `version`,
`tasks` and `categories`, and either appends to or replaces what is stored.

Import writes each collection independently. If a write fails part way,
collections written before it stay written; there is no rollback.
*/

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};

use crate::compression::{decompress_if_gzip, CompressionAdapter};
use crate::engine::PersistentStore;
use crate::store::KeyValueStore;
use crate::{Result, TaskflowError};

/// File name prefix of written exports
pub const EXPORT_FILE_PREFIX: &str = "taskapp_export_";

/// Point-in-time snapshot of every application collection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub export_date: DateTime<Utc>,
    pub task_count: usize,
    pub category_count: usize,
    pub tasks: Vec<Value>,
    pub categories: Vec<Value>,
    pub settings: Value,
}

/// What an import changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub merged: bool,
    pub tasks_imported: usize,
    pub categories_imported: usize,
    /// Tasks stored after the import
    pub total_tasks: usize,
    /// Categories stored after the import
    pub total_categories: usize,
    pub settings_replaced: bool,
}

impl<S> PersistentStore<S>
where
    S: KeyValueStore,
{
    /// Snapshot the stored collections; missing ones export as empty
    pub fn export_data(&self) -> ExportDocument {
        let keys = &self.config.keys;
        let tasks: Vec<Value> = self.load(&keys.tasks, Vec::new());
        let categories: Vec<Value> = self.load(&keys.categories, Vec::new());
        let settings: Value = self.load(&keys.settings, json!({}));

        ExportDocument {
            version: self.config.schema_version,
            export_date: self.clock.now(),
            task_count: tasks.len(),
            category_count: categories.len(),
            tasks,
            categories,
            settings,
        }
    }

    /// Write an export file into `dir` and return its path
    ///
    /// The file is named `taskapp_export_{YYYY-MM-DD}` plus the compressor's
    /// extension (`.json` or `.json.gz`). An existing file of the same name is
    /// replaced.
    pub fn write_export<C>(&self, dir: &Path, compressor: &C) -> Result<PathBuf>
    where
        C: CompressionAdapter + ?Sized,
    {
        let document = self.export_data();
        let file_name = format!(
            "{EXPORT_FILE_PREFIX}{}.{}",
            document.export_date.format("%Y-%m-%d"),
            compressor.file_extension()
        );

        let json = serde_json::to_vec_pretty(&document)?;
        let bytes = compressor.compress(&json)?;

        fs::create_dir_all(dir).map_err(|e| {
            TaskflowError::storage(format!("Failed to create directory {}: {}", dir.display(), e))
        })?;
        let path = dir.join(file_name);
        fs::write(&path, &bytes).map_err(|e| {
            TaskflowError::storage(format!("Failed to write export {}: {}", path.display(), e))
        })?;

        info!(
            path = %path.display(),
            tasks = document.task_count,
            categories = document.category_count,
            compression = compressor.algorithm_name(),
            "Wrote export"
        );
        Ok(path)
    }

    /// Validate `document` and write its collections
    ///
    /// With `merge`, imported tasks and categories are appended to the stored
    /// ones (duplicates are kept). Without it they replace the stored ones,
    /// and `settings`, when present, replaces stored settings.
    ///
    /// # Errors
    /// * `TaskflowError::ImportShape` - If `version`, `tasks` or `categories`
    ///   is missing, or a collection is not an array. Nothing is written.
    /// * Any store error from a write; earlier writes are not undone.
    pub fn try_import(&self, document: &Value, merge: bool) -> Result<ImportSummary> {
        let fields = validate_import(document)?;
        let keys = &self.config.keys;

        let imported_tasks = array_field(fields, "tasks")?;
        let imported_categories = array_field(fields, "categories")?;

        let (tasks, categories) = if merge {
            let mut tasks: Vec<Value> = self.load(&keys.tasks, Vec::new());
            tasks.extend(imported_tasks.iter().cloned());
            let mut categories: Vec<Value> = self.load(&keys.categories, Vec::new());
            categories.extend(imported_categories.iter().cloned());
            (tasks, categories)
        } else {
            (imported_tasks.clone(), imported_categories.clone())
        };

        self.try_save(&keys.tasks, &tasks)?;
        self.try_save(&keys.categories, &categories)?;

        let mut settings_replaced = false;
        if !merge {
            if let Some(settings) = fields.get("settings").filter(|s| !s.is_null()) {
                self.try_save(&keys.settings, settings)?;
                settings_replaced = true;
            }
        }

        Ok(ImportSummary {
            merged: merge,
            tasks_imported: imported_tasks.len(),
            categories_imported: imported_categories.len(),
            total_tasks: tasks.len(),
            total_categories: categories.len(),
            settings_replaced,
        })
    }

    /// Import `document`, reporting failure as `false`
    pub fn import_data(&self, document: &Value, merge: bool) -> bool {
        match self.try_import(document, merge) {
            Ok(summary) => {
                info!(
                    merged = summary.merged,
                    tasks = summary.tasks_imported,
                    categories = summary.categories_imported,
                    "Import complete"
                );
                true
            }
            Err(e) => {
                error!(error = %e, merge, "Import failed");
                false
            }
        }
    }
}

/// Read an export file, transparently handling gzip
pub fn read_export_file(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).map_err(|e| {
        TaskflowError::storage(format!("Failed to read export {}: {}", path.display(), e))
    })?;
    let bytes = decompress_if_gzip(bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn validate_import(document: &Value) -> Result<&Map<String, Value>> {
    let fields = document
        .as_object()
        .ok_or_else(|| TaskflowError::import_shape("expected a JSON object"))?;

    for required in ["version", "tasks", "categories"] {
        match fields.get(required) {
            None | Some(Value::Null) => {
                return Err(TaskflowError::import_shape(format!(
                    "missing field `{required}`"
                )))
            }
            Some(_) => {}
        }
    }
    Ok(fields)
}

fn array_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Result<&'a Vec<Value>> {
    fields
        .get(name)
        .and_then(Value::as_array)
        .ok_or_else(|| TaskflowError::import_shape(format!("field `{name}` must be an array")))
}
