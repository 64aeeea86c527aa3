//! Runner configuration.

use crate::observer::MigrationObserver;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a [`MigrationRunner`](crate::MigrationRunner).
#[derive(Clone)]
pub struct RunnerConfig {
    /// Budget for metadata reads, ledger writes, and opening transactions.
    pub metadata_timeout: Duration,

    /// Budget for executing a migration script and committing it.
    pub ddl_timeout: Duration,

    /// How long to wait for the migration lock before giving up with
    /// [`MigrationError::LockUnavailable`](crate::MigrationError::LockUnavailable).
    ///
    /// A zero duration makes a single attempt.
    pub lock_timeout: Duration,

    /// Delay between two attempts to take the migration lock.
    pub lock_poll_interval: Duration,

    /// Optional callback invoked after every migration step.
    ///
    /// Default: `None`
    pub observer: Option<Arc<dyn MigrationObserver>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(10),
            ddl_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(60),
            lock_poll_interval: Duration::from_millis(250),
            observer: None,
        }
    }
}

impl std::fmt::Debug for RunnerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerConfig")
            .field("metadata_timeout", &self.metadata_timeout)
            .field("ddl_timeout", &self.ddl_timeout)
            .field("lock_timeout", &self.lock_timeout)
            .field("lock_poll_interval", &self.lock_poll_interval)
            .field("observer", &self.observer.as_ref().map(|_| "Some(<observer>)"))
            .finish()
    }
}
