//! Applies and reverts catalog migrations against a [`SchemaStore`].

use crate::catalog::Catalog;
use crate::config::RunnerConfig;
use crate::definition::{MigrationDefinition, Version};
use crate::error::{MigrationError, RunError};
use crate::guard::{Budget, OperationGuard};
use crate::introspector::{SchemaDrift, SchemaIntrospector};
use crate::ledger::{LedgerEntry, MigrationLedger, verify_prefix};
use crate::observer::{Direction, MigrationEvent, MigrationOutcome};
use crate::report::{MigrationReport, MigrationStatus, PendingMigration};
use crate::store::{SchemaStore, StoreTransaction};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handles schema migrations for a store.
///
/// Every mutating operation takes the store's migration lock, checks that
/// the ledger is a prefix of the catalog, and then runs one transaction per
/// migration: the script and its ledger row commit together or not at all.
///
/// # Usage
///
/// ```rust,ignore
/// use strata_core::{Catalog, MigrationRunner};
///
/// let runner = MigrationRunner::new(store, Catalog::from_static(MIGRATIONS));
///
/// // Run all pending migrations; halt startup on failure.
/// let report = runner.apply_all().await?;
/// println!("Applied {:?}", report.completed);
///
/// // Roll back everything above version 2.
/// runner.rollback_to(2).await?;
/// ```
pub struct MigrationRunner<S: SchemaStore> {
    store: S,
    catalog: Catalog,
    config: RunnerConfig,
    guard: OperationGuard,
}

impl<S: SchemaStore> MigrationRunner<S> {
    /// Creates a runner with the default configuration.
    pub fn new(store: S, catalog: Catalog) -> Self {
        Self::with_config(store, catalog, RunnerConfig::default())
    }

    /// Creates a runner with the given configuration.
    pub fn with_config(store: S, catalog: Catalog, config: RunnerConfig) -> Self {
        let guard = OperationGuard::new(
            config.metadata_timeout,
            config.ddl_timeout,
            CancellationToken::new(),
        );
        Self {
            store,
            catalog,
            config,
            guard,
        }
    }

    /// Replaces the runner's cancellation token.
    ///
    /// Cancelling the token aborts the in-flight store call and rolls back
    /// the open transaction, if any.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.guard = OperationGuard::new(
            self.config.metadata_timeout,
            self.config.ddl_timeout,
            cancel,
        );
        self
    }

    /// The token observed by every store call of this runner.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.guard.cancel_token().clone()
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The compiled catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Ledger access bound to this runner's budgets.
    pub fn ledger(&self) -> MigrationLedger<'_, S> {
        MigrationLedger::new(&self.store, &self.guard)
    }

    /// Introspection bound to this runner's budgets.
    pub fn introspector(&self) -> SchemaIntrospector<'_, S> {
        SchemaIntrospector::new(&self.store, &self.guard)
    }

    /// Creates the ledger table if it does not exist.
    pub async fn initialize(&self) -> Result<(), MigrationError> {
        self.ledger().initialize().await
    }

    /// Runs all pending migrations, in catalog order.
    ///
    /// Stops at the first failure. Migrations committed before it stay
    /// committed and are listed in [`RunError::completed`].
    pub async fn apply_all(&self) -> Result<MigrationReport, RunError> {
        let started = Instant::now();
        self.catalog.validate()?;

        let lock = self.acquire_lock().await?;
        let result = self.apply_pending(Uuid::new_v4()).await;
        self.release_lock(lock).await;

        let completed = result?;
        Ok(MigrationReport {
            direction: Direction::Up,
            completed,
            elapsed: started.elapsed(),
        })
    }

    /// Reverts every applied migration above `target`, highest first.
    ///
    /// A target at or above the current version is a no-op. Stops at the
    /// first failure, like [`MigrationRunner::apply_all`].
    pub async fn rollback_to(&self, target: Version) -> Result<MigrationReport, RunError> {
        let started = Instant::now();
        if target < 0 {
            return Err(MigrationError::InvalidTarget(target).into());
        }
        self.catalog.validate()?;

        let lock = self.acquire_lock().await?;
        let result = self.revert_above(target, Uuid::new_v4()).await;
        self.release_lock(lock).await;

        let completed = result?;
        Ok(MigrationReport {
            direction: Direction::Down,
            completed,
            elapsed: started.elapsed(),
        })
    }

    /// Applies a single migration, which must be the next pending one.
    pub async fn apply_one(&self, version: Version) -> Result<(), MigrationError> {
        self.catalog.validate()?;
        let migration = *self
            .catalog
            .get(version)
            .ok_or(MigrationError::NotFound(version))?;

        let lock = self.acquire_lock().await?;
        let result = self.apply_next(&migration).await;
        self.release_lock(lock).await;
        result
    }

    /// Reverts a single migration, which must be the highest applied one.
    pub async fn rollback_one(&self, version: Version) -> Result<(), MigrationError> {
        self.catalog.validate()?;
        let migration = *self
            .catalog
            .get(version)
            .ok_or(MigrationError::NotFound(version))?;

        let lock = self.acquire_lock().await?;
        let result = self.revert_last(&migration).await;
        self.release_lock(lock).await;
        result
    }

    /// Returns the current version together with applied and pending lists.
    ///
    /// Read-only: does not create the ledger table or take the lock.
    pub async fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let applied = self.ledger().applied().await?;
        let pending: Vec<PendingMigration> = self
            .catalog
            .pending(&applied)
            .into_iter()
            .map(PendingMigration::from)
            .collect();

        Ok(MigrationStatus {
            current_version: applied.last().map(|e| e.version).unwrap_or(0),
            applied_count: applied.len(),
            pending_count: pending.len(),
            applied,
            pending,
        })
    }

    /// Reports objects that disagree with the ledger.
    pub async fn verify(&self) -> Result<Vec<SchemaDrift>, MigrationError> {
        let applied = self.ledger().applied().await?;
        self.introspector().verify(&self.catalog, &applied).await
    }

    async fn apply_pending(&self, run_id: Uuid) -> Result<Vec<Version>, RunError> {
        self.ledger().initialize().await?;
        let applied = self.verified_applied().await?;
        if applied.is_empty() {
            self.introspector().first_run_guard(&self.catalog).await?;
        }

        let pending = self.catalog.pending(&applied);
        if pending.is_empty() {
            log::info!("No pending migrations to apply");
            return Ok(Vec::new());
        }

        log::info!("Applying {} pending migrations", pending.len());
        let mut completed = Vec::with_capacity(pending.len());
        for migration in pending {
            if let Err(error) = self.apply_migration(migration, run_id).await {
                return Err(RunError { completed, error });
            }
            completed.push(migration.version);
        }

        log::info!("All migrations applied successfully");
        Ok(completed)
    }

    async fn revert_above(&self, target: Version, run_id: Uuid) -> Result<Vec<Version>, RunError> {
        let applied = self.verified_applied().await?;
        let to_revert: Vec<&LedgerEntry> =
            applied.iter().rev().filter(|e| e.version > target).collect();

        if to_revert.is_empty() {
            log::info!("No migrations to roll back to version {}", target);
            return Ok(Vec::new());
        }

        log::info!(
            "Rolling back {} migrations to version {}",
            to_revert.len(),
            target
        );
        let mut completed = Vec::with_capacity(to_revert.len());
        for entry in to_revert {
            let Some(migration) = self.catalog.get(entry.version) else {
                let error = MigrationError::LedgerCorrupt(format!(
                    "version {} is recorded but not defined in the catalog",
                    entry.version
                ));
                return Err(RunError { completed, error });
            };
            if let Err(error) = self.rollback_migration(migration, run_id).await {
                return Err(RunError { completed, error });
            }
            completed.push(migration.version);
        }

        log::info!("Successfully rolled back to version {}", target);
        Ok(completed)
    }

    async fn apply_next(&self, migration: &MigrationDefinition) -> Result<(), MigrationError> {
        self.ledger().initialize().await?;
        let applied = self.verified_applied().await?;
        if applied.iter().any(|e| e.version == migration.version) {
            return Err(MigrationError::DuplicateVersion(migration.version));
        }
        if applied.is_empty() {
            self.introspector().first_run_guard(&self.catalog).await?;
        }

        let next = self.catalog.pending(&applied).first().map(|m| m.version);
        if next != Some(migration.version) {
            return Err(MigrationError::OutOfOrder {
                version: migration.version,
                expected: next.unwrap_or(migration.version),
            });
        }
        self.apply_migration(migration, Uuid::new_v4()).await
    }

    async fn revert_last(&self, migration: &MigrationDefinition) -> Result<(), MigrationError> {
        let applied = self.verified_applied().await?;
        let Some(last) = applied.last() else {
            return Err(MigrationError::NotFound(migration.version));
        };
        if !applied.iter().any(|e| e.version == migration.version) {
            return Err(MigrationError::NotFound(migration.version));
        }
        if last.version != migration.version {
            return Err(MigrationError::OutOfOrder {
                version: migration.version,
                expected: last.version,
            });
        }
        self.rollback_migration(migration, Uuid::new_v4()).await
    }

    async fn verified_applied(&self) -> Result<Vec<LedgerEntry>, MigrationError> {
        let applied = self.ledger().applied().await?;
        verify_prefix(&applied, &self.catalog)?;
        Ok(applied)
    }

    async fn apply_migration(
        &self,
        migration: &MigrationDefinition,
        run_id: Uuid,
    ) -> Result<(), MigrationError> {
        log::info!("Running migration {}...", migration);
        let started = Instant::now();
        let result = self.run_step(migration, Direction::Up).await;
        self.notify(run_id, migration, Direction::Up, started, &result)
            .await;

        match result {
            Ok(()) => {
                log::info!("Migration {} applied successfully", migration);
                Ok(())
            }
            Err(cause) => Err(MigrationError::ApplyFailed {
                version: migration.version,
                name: migration.name.to_string(),
                cause: Box::new(cause),
            }),
        }
    }

    async fn rollback_migration(
        &self,
        migration: &MigrationDefinition,
        run_id: Uuid,
    ) -> Result<(), MigrationError> {
        log::info!("Rolling back migration {}...", migration);
        let started = Instant::now();
        let result = self.run_step(migration, Direction::Down).await;
        self.notify(run_id, migration, Direction::Down, started, &result)
            .await;

        match result {
            Ok(()) => {
                log::info!("Migration {} rolled back successfully", migration);
                Ok(())
            }
            Err(cause) => Err(MigrationError::RollbackFailed {
                version: migration.version,
                name: migration.name.to_string(),
                cause: Box::new(cause),
            }),
        }
    }

    /// One transaction: script plus ledger change, then commit.
    async fn run_step(
        &self,
        migration: &MigrationDefinition,
        direction: Direction,
    ) -> Result<(), MigrationError> {
        let mut tx = self
            .guard
            .run("begin_transaction", Budget::Metadata, self.store.begin())
            .await?;

        match self.step_in_tx(&mut tx, migration, direction).await {
            Ok(()) => {
                self.guard
                    .run("commit_transaction", Budget::Ddl, tx.commit())
                    .await
            }
            Err(err) => {
                self.abort(tx, migration).await;
                Err(err)
            }
        }
    }

    async fn step_in_tx(
        &self,
        tx: &mut S::Transaction,
        migration: &MigrationDefinition,
        direction: Direction,
    ) -> Result<(), MigrationError> {
        let ledger = self.ledger();
        match direction {
            Direction::Up => {
                if !migration.up.trim().is_empty() {
                    self.guard
                        .run("execute_up", Budget::Ddl, tx.execute(migration.up))
                        .await?;
                }
                ledger.record(tx, migration.version, migration.name).await
            }
            Direction::Down => {
                if !migration.down.trim().is_empty() {
                    self.guard
                        .run("execute_down", Budget::Ddl, tx.execute(migration.down))
                        .await?;
                }
                ledger.remove(tx, migration.version).await
            }
        }
    }

    /// Rolls back `tx`. Runs even when the runner was cancelled.
    async fn abort(&self, tx: S::Transaction, migration: &MigrationDefinition) {
        match tokio::time::timeout(self.config.metadata_timeout, tx.rollback()).await {
            Ok(Ok(())) => log::debug!("Transaction for migration {} rolled back", migration),
            Ok(Err(err)) => log::warn!(
                "Failed to roll back transaction for migration {}: {}",
                migration,
                err
            ),
            Err(_) => log::warn!(
                "Rolling back transaction for migration {} timed out; it is discarded when its connection closes",
                migration
            ),
        }
    }

    async fn acquire_lock(&self) -> Result<S::Lock, MigrationError> {
        let started = Instant::now();
        let mut announced = false;
        loop {
            let lock = self
                .guard
                .run("acquire_lock", Budget::Metadata, self.store.try_lock())
                .await?;
            if let Some(lock) = lock {
                log::debug!("Migration lock acquired after {:?}", started.elapsed());
                return Ok(lock);
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_timeout {
                return Err(MigrationError::LockUnavailable { waited });
            }
            if !announced {
                log::info!("Migration lock is held by another runner, waiting...");
                announced = true;
            }
            tokio::select! {
                _ = self.guard.cancel_token().cancelled() => {
                    return Err(MigrationError::Cancelled { operation: "acquire_lock" });
                }
                _ = tokio::time::sleep(self.config.lock_poll_interval) => {}
            }
        }
    }

    /// Releases the lock. Runs even when the runner was cancelled.
    async fn release_lock(&self, lock: S::Lock) {
        match tokio::time::timeout(self.config.metadata_timeout, self.store.unlock(lock)).await {
            Ok(Ok(())) => log::debug!("Migration lock released"),
            Ok(Err(err)) => log::warn!("Failed to release migration lock: {}", err),
            Err(_) => log::warn!("Releasing the migration lock timed out"),
        }
    }

    async fn notify(
        &self,
        run_id: Uuid,
        migration: &MigrationDefinition,
        direction: Direction,
        started: Instant,
        result: &Result<(), MigrationError>,
    ) {
        let Some(observer) = &self.config.observer else {
            return;
        };
        let outcome = match result {
            Ok(()) => MigrationOutcome::Committed,
            Err(err) => MigrationOutcome::Failed(err.to_string()),
        };
        let event = MigrationEvent {
            run_id,
            version: migration.version,
            name: migration.name.to_string(),
            direction,
            elapsed: started.elapsed(),
            outcome,
        };
        let budget = self.config.metadata_timeout;
        if tokio::time::timeout(budget, observer.on_migration(event)).await.is_err() {
            log::warn!(
                "Observer did not finish within {:?} for migration {}, moving on",
                budget,
                migration
            );
        }
    }
}
