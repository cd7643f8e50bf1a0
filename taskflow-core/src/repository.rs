/*!
Task and category operations on top of [`PersistentStore`].
*/

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::PersistentStore;
use crate::store::KeyValueStore;
use crate::task::{CategoryRecord, NewTask, Status, Task, TaskFilter, TaskPatch, TaskStats};
use crate::{Result, TaskflowError};

/// CRUD, ordering and filtering over the stored task collection
///
/// Every mutation loads the collection, changes it and saves it back, so
/// each one produces exactly one envelope write and one backup.
///
/// # Example
/// ```rust
/// use taskflow_core::{MemoryStore, NewTask, PersistentStore, StoreConfig, TaskRepository};
///
/// let store = PersistentStore::new(MemoryStore::new(), StoreConfig::default_memory());
/// let tasks = TaskRepository::new(&store);
///
/// let task = tasks.create(NewTask::new("Buy milk"))?;
/// assert_eq!(tasks.get(&task.id)?.title, "Buy milk");
/// # Ok::<(), taskflow_core::TaskflowError>(())
/// ```
pub struct TaskRepository<'a, S>
where
    S: KeyValueStore,
{
    store: &'a PersistentStore<S>,
}

impl<'a, S> TaskRepository<'a, S>
where
    S: KeyValueStore,
{
    pub fn new(store: &'a PersistentStore<S>) -> Self {
        Self { store }
    }

    /// The date overdue checks compare against, taken from the store clock
    pub fn today(&self) -> NaiveDate {
        self.store.now().date_naive()
    }

    /// All readable tasks ordered by their `order` field
    ///
    /// Stored entries that do not parse as a [`Task`] are skipped here and
    /// kept in storage by every mutation.
    pub fn list(&self) -> Vec<Task> {
        let entries: Vec<Value> = self.store.load(&self.store.config.keys.tasks, Vec::new());
        let mut tasks = parse_entries::<Task>(&entries, "task");
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    pub fn get(&self, id: &str) -> Result<Task> {
        self.list()
            .into_iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskflowError::not_found(format!("task '{id}'")))
    }

    /// Tasks matching `filter`, in list order
    pub fn filter(&self, filter: &TaskFilter) -> Vec<Task> {
        let today = self.today();
        self.list()
            .into_iter()
            .filter(|t| filter.matches(t, today))
            .collect()
    }

    /// Create a task at the end of the list
    ///
    /// # Errors
    /// * `TaskflowError::Validation` - If the title is blank
    /// * `TaskflowError::Json` - If the stored collection cannot be read
    pub fn create(&self, new_task: NewTask) -> Result<Task> {
        let title = new_task.title.trim();
        if title.is_empty() {
            return Err(TaskflowError::validation("task title cannot be empty"));
        }

        let mut entries = self.load_entries(&self.store.config.keys.tasks)?;
        let now = self.store.now();
        let order = entries
            .iter()
            .map(|entry| entry_order(entry).unwrap_or(0).saturating_add(1))
            .max()
            .unwrap_or(0);
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: new_task.description,
            category: new_task.category,
            status: new_task.status,
            priority: new_task.priority,
            due_date: new_task.due_date,
            order,
            created_at: now,
            updated_at: now,
            attachments: None,
        };
        entries.push(serde_json::to_value(&task)?);
        self.persist(&entries)?;

        info!(id = %task.id, title = %task.title, "Created task");
        Ok(task)
    }

    /// Apply `patch` to the task with `id`
    ///
    /// Fields of the stored entry that [`Task`] does not model are kept.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(TaskflowError::validation("task title cannot be empty"));
            }
        }

        let mut entries = self.load_entries(&self.store.config.keys.tasks)?;
        let index = find_entry(&entries, id)?;
        let mut task = parse_task(&entries[index], id)?;

        patch.apply(&mut task);
        task.title = task.title.trim().to_string();
        task.updated_at = self.store.now();
        overlay_task(&mut entries[index], &task)?;

        self.persist(&entries)?;
        debug!(id, "Updated task");
        Ok(task)
    }

    pub fn set_status(&self, id: &str, status: Status) -> Result<Task> {
        self.update(
            id,
            TaskPatch {
                status: Some(status),
                ..TaskPatch::default()
            },
        )
    }

    /// Remove the task with `id`, returning it
    pub fn delete(&self, id: &str) -> Result<Task> {
        let mut entries = self.load_entries(&self.store.config.keys.tasks)?;
        let index = find_entry(&entries, id)?;
        let removed = parse_task(&entries[index], id)?;
        entries.remove(index);

        self.persist(&entries)?;
        info!(id, "Deleted task");
        Ok(removed)
    }

    /// Move the task with `id` to `index` and renumber every entry's `order`
    ///
    /// An index past the end moves the task last.
    pub fn reorder(&self, id: &str, index: usize) -> Result<Vec<Task>> {
        let mut entries = self.load_entries(&self.store.config.keys.tasks)?;
        entries.sort_by_key(|entry| entry_order(entry).unwrap_or(0));
        let from = find_entry(&entries, id)?;

        let entry = entries.remove(from);
        let to = index.min(entries.len());
        entries.insert(to, entry);
        for (order, entry) in entries.iter_mut().enumerate() {
            if let Some(fields) = entry.as_object_mut() {
                fields.insert("order".to_string(), Value::from(order));
            }
        }

        self.persist(&entries)?;
        Ok(parse_entries(&entries, "task"))
    }

    pub fn stats(&self) -> TaskStats {
        let today = self.today();
        self.list()
            .iter()
            .fold(TaskStats::default(), |mut stats, task| {
                stats.total += 1;
                match task.status {
                    Status::Todo => stats.todo += 1,
                    Status::InProgress => stats.in_progress += 1,
                    Status::Done => stats.done += 1,
                }
                if task.is_overdue(today) {
                    stats.overdue += 1;
                }
                stats
            })
    }

    /// The readable entries of the stored categories collection
    pub fn categories(&self) -> Vec<CategoryRecord> {
        let entries: Vec<Value> = self
            .store
            .load(&self.store.config.keys.categories, Vec::new());
        parse_entries(&entries, "category")
    }

    /// Add a category; names are unique ignoring case
    pub fn add_category<N: Into<String>>(&self, name: N, color: Option<String>) -> Result<CategoryRecord> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(TaskflowError::validation("category name cannot be empty"));
        }

        let key = &self.store.config.keys.categories;
        let mut entries = self.load_entries(key)?;
        let taken = entries
            .iter()
            .filter_map(|entry| entry.get("name").and_then(Value::as_str))
            .any(|existing| existing.eq_ignore_ascii_case(&name));
        if taken {
            return Err(TaskflowError::validation(format!(
                "category '{name}' already exists"
            )));
        }

        let record = CategoryRecord {
            id: Uuid::new_v4().to_string(),
            name,
            color,
        };
        entries.push(serde_json::to_value(&record)?);
        self.store.try_save(key, &entries)?;
        Ok(record)
    }

    /// Stored entries of a collection for a read-modify-write cycle
    ///
    /// An unreadable primary gets one recovery attempt from its newest
    /// backup; if that fails too the error is returned, never an empty list.
    fn load_entries(&self, key: &str) -> Result<Vec<Value>> {
        match self.store.try_load::<Vec<Value>>(key) {
            Ok(entries) => Ok(entries.unwrap_or_default()),
            Err(e) => match self.store.restore_from_backup_as::<Vec<Value>>(key) {
                Some(entries) => {
                    warn!(key, error = %e, "Collection recovered from backup before update");
                    Ok(entries)
                }
                None => Err(e),
            },
        }
    }

    fn persist(&self, entries: &[Value]) -> Result<()> {
        self.store.try_save(&self.store.config.keys.tasks, entries)
    }
}

fn parse_entries<T: DeserializeOwned>(entries: &[Value], kind: &str) -> Vec<T> {
    let parsed: Vec<T> = entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect();
    let skipped = entries.len() - parsed.len();
    if skipped > 0 {
        debug!(kind, skipped, "Skipped unreadable entries");
    }
    parsed
}

fn parse_task(entry: &Value, id: &str) -> Result<Task> {
    serde_json::from_value(entry.clone()).map_err(|e| {
        TaskflowError::invalid_format(format!("stored task '{id}' is not a valid task: {e}"))
    })
}

fn find_entry(entries: &[Value], id: &str) -> Result<usize> {
    entries
        .iter()
        .position(|entry| entry.get("id").and_then(Value::as_str) == Some(id))
        .ok_or_else(|| TaskflowError::not_found(format!("task '{id}'")))
}

fn entry_order(entry: &Value) -> Option<u32> {
    entry
        .get("order")
        .and_then(Value::as_u64)
        .and_then(|order| u32::try_from(order).ok())
}

/// Write `task` into `entry`, keeping fields `Task` does not model
fn overlay_task(entry: &mut Value, task: &Task) -> Result<()> {
    let updated = serde_json::to_value(task)?;
    match entry {
        Value::Object(fields) => {
            if let Value::Object(updated) = updated {
                // unset optionals are omitted on serialization
                fields.remove("dueDate");
                fields.remove("attachments");
                fields.extend(updated);
            }
        }
        _ => *entry = updated,
    }
    Ok(())
}
