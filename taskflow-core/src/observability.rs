/*!
Observability infrastructure for TaskFlow storage.

This module provides:
- Structured logging setup on top of `tracing-subscriber`
- Prometheus counters for saves, backups and recoveries (`metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Gauge, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, TaskflowError};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<TaskflowMetrics> = OnceLock::new();

/// Metrics collection for persistence operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct TaskflowMetrics {
    pub saves_total: Counter,
    pub save_failures_total: Counter,
    pub backups_written_total: Counter,
    pub backups_pruned_total: Counter,
    pub recoveries_total: Counter,
    pub recovery_failures_total: Counter,
    pub storage_usage_percent: Gauge,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl TaskflowMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<Counter> {
            let counter = Counter::new(name, help).map_err(|e| {
                TaskflowError::storage(format!("Failed to create {name} metric: {e}"))
            })?;
            registry.register(Box::new(counter.clone())).map_err(|e| {
                TaskflowError::storage(format!("Failed to register {name}: {e}"))
            })?;
            Ok(counter)
        };

        let saves_total = counter("taskflow_saves_total", "Envelopes written to the store")?;
        let save_failures_total =
            counter("taskflow_save_failures_total", "Saves rejected by the store")?;
        let backups_written_total =
            counter("taskflow_backups_written_total", "Backup entries created")?;
        let backups_pruned_total = counter(
            "taskflow_backups_pruned_total",
            "Backup entries removed by retention",
        )?;
        let recoveries_total = counter(
            "taskflow_recoveries_total",
            "Loads answered from a backup after the primary failed",
        )?;
        let recovery_failures_total = counter(
            "taskflow_recovery_failures_total",
            "Loads where neither primary nor backup could be read",
        )?;

        let storage_usage_percent = Gauge::new(
            "taskflow_storage_usage_percent",
            "Estimated share of the storage quota in use",
        )
        .map_err(|e| {
            TaskflowError::storage(format!("Failed to create storage_usage_percent metric: {e}"))
        })?;
        registry
            .register(Box::new(storage_usage_percent.clone()))
            .map_err(|e| {
                TaskflowError::storage(format!("Failed to register storage_usage_percent: {e}"))
            })?;

        Ok(Self {
            saves_total,
            save_failures_total,
            backups_written_total,
            backups_pruned_total,
            recoveries_total,
            recovery_failures_total,
            storage_usage_percent,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> Option<&'static TaskflowMetrics> {
        if let Some(metrics) = METRICS.get() {
            return Some(metrics);
        }
        match Self::new() {
            Ok(metrics) => Some(METRICS.get_or_init(|| metrics)),
            Err(e) => {
                tracing::warn!(error = %e, "Metrics unavailable");
                None
            }
        }
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| TaskflowError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| TaskflowError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Recording hooks used by the persistence layer; no-ops without `metrics`
#[cfg(feature = "metrics")]
pub(crate) mod record {
    use super::TaskflowMetrics;

    pub fn save(ok: bool) {
        if let Some(m) = TaskflowMetrics::global() {
            if ok {
                m.saves_total.inc();
            } else {
                m.save_failures_total.inc();
            }
        }
    }

    pub fn backup_written() {
        if let Some(m) = TaskflowMetrics::global() {
            m.backups_written_total.inc();
        }
    }

    pub fn backups_pruned(count: usize) {
        if let Some(m) = TaskflowMetrics::global() {
            m.backups_pruned_total.inc_by(count as f64);
        }
    }

    pub fn recovery(ok: bool) {
        if let Some(m) = TaskflowMetrics::global() {
            if ok {
                m.recoveries_total.inc();
            } else {
                m.recovery_failures_total.inc();
            }
        }
    }

    pub fn usage(percent: f64) {
        if let Some(m) = TaskflowMetrics::global() {
            m.storage_usage_percent.set(percent);
        }
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) mod record {
    pub fn save(_ok: bool) {}
    pub fn backup_written() {}
    pub fn backups_pruned(_count: usize) {}
    pub fn recovery(_ok: bool) {}
    pub fn usage(_percent: f64) {}
}

/// Initialize the global tracing subscriber
///
/// # Arguments
/// * `json` - Emit JSON lines instead of human-readable output
///
/// The filter comes from `RUST_LOG`, falling back to `taskflow=info`.
pub fn init_observability(json: bool) -> Result<()> {
    init_observability_with_filter(json, "taskflow=info")
}

/// Initialize the global tracing subscriber with a fallback filter
///
/// # Arguments
/// * `json` - Emit JSON lines instead of human-readable output
/// * `default_filter` - `EnvFilter` directives used when `RUST_LOG` is unset
///
/// Logs go to stderr so they never mix with command output.
///
/// # Errors
/// * `TaskflowError::Validation` - If `default_filter` is not a valid directive list
/// * `TaskflowError::Storage` - If a global subscriber is already installed
pub fn init_observability_with_filter(json: bool, default_filter: &str) -> Result<()> {
    let fallback = EnvFilter::try_new(default_filter)
        .map_err(|e| TaskflowError::validation(format!("Invalid log directive: {e}")))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or(fallback);

    #[cfg(feature = "metrics")]
    let _ = TaskflowMetrics::global();

    let result = if json {
        let subscriber = TracingRegistry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(false)
                .with_writer(std::io::stderr),
        );
        set_global_default(subscriber)
    } else {
        let subscriber = TracingRegistry::default().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        );
        set_global_default(subscriber)
    };

    result.map_err(|e| {
        TaskflowError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("TaskFlow observability initialized");
    Ok(())
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
