//! Read models returned by the runner.

use crate::definition::{MigrationDefinition, Version};
use crate::ledger::LedgerEntry;
use crate::observer::Direction;
use serde::Serialize;
use std::time::Duration;

/// A catalog migration that has not been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMigration {
    /// The version number of the migration.
    pub version: Version,
    /// The human-readable name of the migration.
    pub name: String,
}

impl From<&MigrationDefinition> for PendingMigration {
    fn from(migration: &MigrationDefinition) -> Self {
        PendingMigration {
            version: migration.version,
            name: migration.name.to_string(),
        }
    }
}

/// Snapshot combining catalog and ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Highest applied version, or 0.
    pub current_version: Version,
    /// Number of applied migrations.
    pub applied_count: usize,
    /// Number of pending migrations.
    pub pending_count: usize,
    /// Applied migrations, ascending.
    pub applied: Vec<LedgerEntry>,
    /// Pending migrations, ascending.
    pub pending: Vec<PendingMigration>,
}

/// Result of a successful `apply_all` or `rollback_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Which scripts were executed.
    pub direction: Direction,
    /// Versions committed, in execution order.
    pub completed: Vec<Version>,
    /// Total time spent, lock wait included.
    pub elapsed: Duration,
}

impl MigrationReport {
    /// Returns `true` when the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.completed.is_empty()
    }
}
