/*!
End-to-end tests for the TaskFlow persistence layer on a file-backed store.
*/

use chrono::Duration;
use serde_json::{json, Value};
use std::sync::Arc;
use taskflow_core::{
    read_export_file, FileStore, GzipCompressor, KeyValueStore, ManualClock, MemoryStore,
    NewTask, PersistentStore, Status, StoreConfig, TaskFilter, TaskRepository,
};
use tempfile::TempDir;

const START: i64 = 1_760_000_000_000;

fn file_backed(dir: &TempDir) -> (PersistentStore<FileStore>, Arc<ManualClock>) {
    let path = dir.path().join("taskflow-store.json");
    let config = StoreConfig::file(&path);
    let store = FileStore::open_with_quota(&path, config.store_quota()).unwrap();
    let clock = Arc::new(ManualClock::at_millis(START));
    (
        PersistentStore::new(store, config).with_clock(clock.clone()),
        clock,
    )
}

#[test]
fn test_roundtrip_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let value = json!({
        "tasks": [{"id": "1", "title": "Buy milk", "tags": ["errand", "dairy"]}],
        "nested": {"depth": {"ok": true}},
        "unicode": "café ✓"
    });

    {
        let (store, _) = file_backed(&temp_dir);
        assert!(store.save("snapshot", &value));
    }

    let (reopened, _) = file_backed(&temp_dir);
    assert_eq!(reopened.load("snapshot", json!(null)), value);
    assert_eq!(
        reopened.load("nonexistent-key", json!({"d": 1})),
        json!({"d": 1})
    );
}

#[test]
fn test_backup_retention_after_many_saves() {
    let temp_dir = TempDir::new().unwrap();
    let (store, clock) = file_backed(&temp_dir);
    let retention = store.config().backup_retention;

    for i in 0..retention + 3 {
        assert!(store.save("tasks", &json!([{"n": i}])));
        clock.advance(Duration::milliseconds(10));
    }

    let backups = store.list_backups("tasks").unwrap();
    assert_eq!(backups.len(), retention);

    let newest_first: Vec<Value> = backups
        .iter()
        .map(|b| {
            let text = store.store().get(&b.storage_key).unwrap().unwrap();
            let envelope: Value = serde_json::from_str(&text).unwrap();
            envelope["data"][0]["n"].clone()
        })
        .collect();
    assert_eq!(newest_first, vec![json!(7), json!(6), json!(5), json!(4), json!(3)]);
}

#[test]
fn test_recovery_after_corruption_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (store, clock) = file_backed(&temp_dir);
        store.try_save("tasks", &json!([{"id": "first"}])).unwrap();
        clock.advance(Duration::seconds(1));
        store.try_save("tasks", &json!([{"id": "second"}])).unwrap();
        store.store().set("tasks", "{\"version\": 1, truncated").unwrap();
    }

    let (store, _) = file_backed(&temp_dir);
    assert_eq!(store.load("tasks", json!([])), json!([{"id": "second"}]));
}

#[test]
fn test_import_validation_leaves_storage_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let (store, _) = file_backed(&temp_dir);
    store.try_save("tasks", &json!([{"id": "B"}])).unwrap();
    let keys_before = store.store().keys().unwrap();

    assert!(!store.import_data(&json!({}), false));
    assert!(!store.import_data(&json!({}), true));

    assert_eq!(store.store().keys().unwrap(), keys_before);
    assert_eq!(store.load("tasks", json!([])), json!([{"id": "B"}]));
}

#[test]
fn test_import_merge_preserves_order() {
    let temp_dir = TempDir::new().unwrap();
    let (store, _) = file_backed(&temp_dir);
    store.try_save("tasks", &json!([{"id": "B"}])).unwrap();

    assert!(store.import_data(
        &json!({"version": 1, "tasks": [{"id": "A"}], "categories": []}),
        true
    ));
    assert_eq!(
        store.load("tasks", json!([])),
        json!([{"id": "B"}, {"id": "A"}])
    );
}

#[test]
fn test_near_limit_tracks_usage() {
    let config = StoreConfig::default_memory().with_quota(1000);
    let raw = MemoryStore::new();
    let store = PersistentStore::new(raw.clone(), config);

    // 1 + 799 = 800 units: exactly 80%
    raw.set("k", &"x".repeat(799)).unwrap();
    assert_eq!(store.storage_usage(), 80.0);
    assert!(!store.is_storage_near_limit());

    raw.set("k", &"x".repeat(800)).unwrap();
    assert!(store.storage_usage() > 80.0);
    assert!(store.is_storage_near_limit());

    raw.set("k", &"x".repeat(100)).unwrap();
    assert_eq!(store.is_storage_near_limit(), store.storage_usage() > 80.0);
}

#[test]
fn test_export_file_roundtrip_into_new_store() {
    let source_dir = TempDir::new().unwrap();
    let (source, _) = file_backed(&source_dir);
    assert!(source.save("tasks", &json!([{"id": "1", "title": "Buy milk"}])));

    let document = source.export_data();
    assert_eq!(document.task_count, 1);
    assert_eq!(document.tasks, vec![json!({"id": "1", "title": "Buy milk"})]);

    let path = source
        .write_export(source_dir.path(), &GzipCompressor::new())
        .unwrap();
    let imported = read_export_file(&path).unwrap();

    let target_dir = TempDir::new().unwrap();
    let (target, _) = file_backed(&target_dir);
    assert!(target.import_data(&imported, false));
    assert_eq!(target.export_data().tasks, document.tasks);
}

#[test]
fn test_task_workflow_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let id = {
        let (store, _) = file_backed(&temp_dir);
        let repo = TaskRepository::new(&store);
        repo.create(NewTask::new("Write report")).unwrap();
        let task = repo.create(NewTask::new("Buy milk")).unwrap();
        repo.set_status(&task.id, Status::Done).unwrap();
        task.id
    };

    let (store, _) = file_backed(&temp_dir);
    let repo = TaskRepository::new(&store);
    let done = repo.filter(&TaskFilter::new().status(Status::Done));
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, id);
    assert_eq!(repo.stats().total, 2);
}
