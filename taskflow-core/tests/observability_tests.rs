/*!
Observability integration tests for TaskFlow storage.

The global subscriber can be installed once per process, so every test that
needs it goes through `init_test_observability`.
*/

use serde_json::json;
use std::sync::Once;
use taskflow_core::{
    init_default_observability, init_observability_with_filter, MemoryStore, PersistentStore,
    StoreConfig, TaskflowError,
};

static INIT: Once = Once::new();

/// Initialize observability system once for all tests
fn init_test_observability() {
    INIT.call_once(|| {
        init_default_observability().expect("Failed to initialize observability");
    });
}

#[test]
fn test_second_initialization_is_rejected() {
    init_test_observability();

    let result = init_observability_with_filter(true, "taskflow=debug");
    assert!(matches!(result, Err(TaskflowError::Storage(_))));
}

#[test]
fn test_invalid_default_filter_is_rejected() {
    let result = init_observability_with_filter(false, "taskflow=loudest");
    assert!(matches!(result, Err(TaskflowError::Validation(_))));
}

#[test]
fn test_operations_log_under_installed_subscriber() {
    init_test_observability();

    let store = PersistentStore::new(MemoryStore::new(), StoreConfig::default_memory());
    assert!(store.save("tasks", &json!([{"id": "1"}])));
    assert_eq!(store.load("tasks", json!([])), json!([{"id": "1"}]));
    assert!(store.storage_usage() > 0.0);
}

#[cfg(feature = "metrics")]
#[test]
fn test_metrics_follow_operations() {
    use taskflow_core::TaskflowMetrics;

    init_test_observability();

    let metrics = TaskflowMetrics::global().expect("metrics registry");
    let saves_before = metrics.saves_total.get();
    let backups_before = metrics.backups_written_total.get();

    let store = PersistentStore::new(MemoryStore::new(), StoreConfig::default_memory());
    assert!(store.save("tasks", &json!([])));

    assert!(metrics.saves_total.get() >= saves_before + 1.0);
    assert!(metrics.backups_written_total.get() >= backups_before + 1.0);

    let text = metrics.gather_metrics().expect("Failed to gather metrics");
    assert!(text.contains("taskflow_saves_total"));
    assert!(text.contains("taskflow_backups_written_total"));
}
