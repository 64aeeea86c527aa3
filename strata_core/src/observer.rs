//! Hooks for reporting migration progress to the outside world.

use async_trait::async_trait;
use crate::definition::Version;
use std::time::Duration;
use uuid::Uuid;

/// Which way a migration was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The forward script.
    Up,
    /// The backward script.
    Down,
}

/// How a single migration step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The step committed.
    Committed,
    /// The step was rolled back. Carries the error message.
    Failed(String),
}

/// Information about a finished migration step, passed to the [`MigrationObserver`].
#[derive(Debug, Clone)]
pub struct MigrationEvent {
    /// Identifies the `apply_all` / `rollback_to` invocation the step belongs to.
    pub run_id: Uuid,
    /// The version of the migration.
    pub version: Version,
    /// The name of the migration.
    pub name: String,
    /// Which script was executed.
    pub direction: Direction,
    /// Time spent from `begin` to `commit` or abort.
    pub elapsed: Duration,
    /// How the step ended.
    pub outcome: MigrationOutcome,
}

/// Callback invoked after every migration step.
///
/// Implementations should be lightweight. They cannot fail the run: the
/// step has already been committed or rolled back when they are called.
///
/// # Example
///
/// ```rust,ignore
/// use strata_core::{MigrationEvent, MigrationObserver};
/// use async_trait::async_trait;
///
/// struct MetricsObserver;
///
/// #[async_trait]
/// impl MigrationObserver for MetricsObserver {
///     async fn on_migration(&self, event: MigrationEvent) {
///         metrics::histogram!("migration_seconds", event.elapsed.as_secs_f64());
///     }
/// }
/// ```
#[async_trait]
pub trait MigrationObserver: Send + Sync {
    /// Called once per migration step, after it committed or was rolled back.
    async fn on_migration(&self, event: MigrationEvent);
}
