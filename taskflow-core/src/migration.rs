/*!
Schema migration for envelopes written under an older schema version.

Loading an envelope whose `version` differs from the configured schema
version hands its data to a [`SchemaMigrator`]. The default,
[`IdentityMigrator`], returns the data unchanged. [`MigrationRegistry`]
chains per-version steps for stores that do need to reshape old data.
*/

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::Result;

/// Transforms data written under `from` into the shape of version `to`
pub trait SchemaMigrator {
    fn migrate(&self, from: u32, to: u32, data: Value) -> Result<Value>;
}

/// Returns data as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMigrator;

impl SchemaMigrator for IdentityMigrator {
    fn migrate(&self, from: u32, to: u32, data: Value) -> Result<Value> {
        debug!(from, to, "No migration registered, returning data unchanged");
        Ok(data)
    }
}

type MigrationStep = Box<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// Ordered set of single-version upgrade steps
///
/// A step registered for version `n` upgrades data from `n` to `n + 1`.
/// Versions without a step pass through unchanged. Data from a newer schema
/// than the target is never downgraded.
///
/// # Example
/// ```rust
/// use taskflow_core::migration::{MigrationRegistry, SchemaMigrator};
/// use serde_json::json;
///
/// let registry = MigrationRegistry::new().register(1, |mut data| {
///     data["migrated"] = json!(true);
///     Ok(data)
/// });
/// let upgraded = registry.migrate(1, 2, json!({}))?;
/// assert_eq!(upgraded, json!({"migrated": true}));
/// # Ok::<(), taskflow_core::TaskflowError>(())
/// ```
#[derive(Default)]
pub struct MigrationRegistry {
    steps: BTreeMap<u32, MigrationStep>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step that upgrades `from` to `from + 1`
    pub fn register<F>(mut self, from: u32, step: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.steps.insert(from, Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for MigrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRegistry")
            .field("versions", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SchemaMigrator for MigrationRegistry {
    fn migrate(&self, from: u32, to: u32, data: Value) -> Result<Value> {
        if from > to {
            warn!(from, to, "Data written by a newer schema, leaving it as-is");
            return Ok(data);
        }

        let mut data = data;
        for version in from..to {
            match self.steps.get(&version) {
                Some(step) => {
                    data = step(data)?;
                    debug!(from = version, to = version + 1, "Applied schema migration");
                }
                None => debug!(version, "No migration step, passing through"),
            }
        }
        Ok(data)
    }
}
