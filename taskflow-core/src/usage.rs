/*!
Storage usage estimation against the assumed quota.
*/

use serde::Serialize;
use tracing::warn;

use crate::config::UsageScope;
use crate::engine::PersistentStore;
use crate::observability::record;
use crate::store::{text_units, KeyValueStore};
use crate::Result;

/// Snapshot of how much of the quota is in use
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    /// Keys counted
    pub keys: usize,
    /// Key plus value length of every counted entry, in UTF-16 code units
    pub used: usize,
    /// Assumed quota
    pub quota: usize,
    /// `used * 100 / quota`
    pub percent: f64,
}

impl<S> PersistentStore<S>
where
    S: KeyValueStore,
{
    /// Measure the namespace according to the configured [`UsageScope`]
    pub fn try_usage_report(&self) -> Result<UsageReport> {
        let mut keys = 0;
        let mut used = 0;

        for key in self.store.keys()? {
            if self.config.usage_scope == UsageScope::Owned && !self.config.owns_key(&key) {
                continue;
            }
            let value = self.store.get(&key)?.unwrap_or_default();
            used += text_units(&key) + text_units(&value);
            keys += 1;
        }

        let quota = self.config.quota;
        Ok(UsageReport {
            keys,
            used,
            quota,
            percent: used as f64 * 100.0 / quota as f64,
        })
    }

    /// Percentage of the quota in use; `0.0` when the namespace cannot be read
    pub fn storage_usage(&self) -> f64 {
        let percent = match self.try_usage_report() {
            Ok(report) => report.percent,
            Err(e) => {
                warn!(error = %e, "Failed to estimate storage usage");
                0.0
            }
        };
        record::usage(percent);
        percent
    }

    /// True when usage is above the configured threshold (80% by default)
    pub fn is_storage_near_limit(&self) -> bool {
        self.storage_usage() > self.config.near_limit_percent
    }
}
