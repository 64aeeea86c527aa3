//! In-memory schema store with transaction support.
//!
//! Transactions work on a private copy of the store's data and swap it in
//! on commit, so a failed migration leaves no trace. Only one transaction
//! runs at a time, mirroring the exclusive-access isolation of the other
//! in-memory backends.
//!
//! Faults can be injected to simulate a store that rejects statements, drops
//! connections or stalls.

use async_trait::async_trait;
use chrono::Utc;
use crate::sql::{ObjectKind, Schema};
use std::sync::Arc;
use std::time::Duration;
use strata_core::{LEDGER_TABLE, LedgerRow, SchemaStore, StoreError, StoreTransaction, Version};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Committed state of the store.
#[derive(Debug, Clone, Default)]
struct StoreData {
    schema: Schema,
    /// Ledger rows in insertion order.
    ledger: Vec<LedgerRow>,
}

/// A store call that a [`Fault`] can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// [`SchemaStore::begin`].
    Begin,
    /// [`StoreTransaction::execute`].
    Execute,
    /// [`StoreTransaction::insert_ledger_row`].
    InsertLedgerRow,
    /// [`StoreTransaction::delete_ledger_row`].
    DeleteLedgerRow,
    /// [`StoreTransaction::commit`].
    Commit,
    /// [`SchemaStore::object_exists`].
    ObjectExists,
    /// [`SchemaStore::ensure_ledger`].
    EnsureLedger,
    /// [`SchemaStore::fetch_ledger`].
    FetchLedger,
    /// [`SchemaStore::try_lock`].
    TryLock,
}

/// What an injected fault does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultEffect {
    /// Fail with [`StoreError::Unavailable`].
    Unavailable,
    /// Fail with [`StoreError::Rejected`].
    Reject,
    /// Sleep for the given duration, then proceed normally.
    Stall(Duration),
}

/// A failure to inject into a [`MemSchemaStore`].
#[derive(Debug, Clone)]
pub struct Fault {
    point: FaultPoint,
    fragment: Option<String>,
    effect: FaultEffect,
    remaining: Option<usize>,
}

impl Fault {
    /// A fault firing on every call at `point`.
    pub fn new(point: FaultPoint, effect: FaultEffect) -> Self {
        Self {
            point,
            fragment: None,
            effect,
            remaining: None,
        }
    }

    /// A fault firing on every script containing `fragment`.
    pub fn on_script(fragment: impl Into<String>, effect: FaultEffect) -> Self {
        Self {
            point: FaultPoint::Execute,
            fragment: Some(fragment.into()),
            effect,
            remaining: None,
        }
    }

    /// Limits the fault to the next `times` matching calls.
    pub fn times(mut self, times: usize) -> Self {
        self.remaining = Some(times);
        self
    }

    fn matches(&self, point: FaultPoint, script: Option<&str>) -> bool {
        if self.point != point || self.remaining == Some(0) {
            return false;
        }
        match (&self.fragment, script) {
            (Some(fragment), Some(script)) => script.contains(fragment.as_str()),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// An in-memory [`SchemaStore`].
///
/// Cloning is cheap and every clone shares the same data, so tests can keep
/// a handle while a runner owns another.
#[derive(Clone, Debug, Default)]
pub struct MemSchemaStore {
    data: Arc<Mutex<StoreData>>,
    tx_lock: Arc<Mutex<()>>,
    migration_lock: Arc<Mutex<()>>,
    faults: Arc<Mutex<Vec<Fault>>>,
    offline: Arc<Mutex<bool>>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl MemSchemaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        log::debug!("Creating a new MemSchemaStore");
        Self::default()
    }

    /// Injects a fault.
    pub async fn inject(&self, fault: Fault) {
        self.faults.lock().await.push(fault);
    }

    /// Removes every injected fault.
    pub async fn clear_faults(&self) {
        self.faults.lock().await.clear();
    }

    /// While offline, every call fails with [`StoreError::Unavailable`].
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.lock().await = offline;
    }

    /// Names of all committed objects, sorted.
    pub async fn object_names(&self) -> Vec<String> {
        self.data.lock().await.schema.names()
    }

    /// The kind of a committed object, if it exists.
    pub async fn object_kind(&self, name: &str) -> Option<ObjectKind> {
        self.data.lock().await.schema.kind(name).cloned()
    }

    /// Committed ledger rows, in insertion order.
    pub async fn ledger_rows(&self) -> Vec<LedgerRow> {
        self.data.lock().await.ledger.clone()
    }

    /// Scripts of committed transactions, in execution order.
    pub async fn journal(&self) -> Vec<String> {
        self.journal.lock().await.clone()
    }

    /// Executes `script` in its own transaction, outside of any migration.
    pub async fn run_script(&self, script: &str) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        tx.execute(script).await?;
        tx.commit().await
    }

    /// Writes a ledger row directly, bypassing every check.
    ///
    /// Creates the ledger table if needed. Used to set up inconsistent
    /// ledgers.
    pub async fn seed_ledger_row(&self, version: Version, name: &str) {
        let mut data = self.data.lock().await;
        data.schema.create_table(LEDGER_TABLE);
        data.ledger.push(LedgerRow {
            version,
            name: name.to_string(),
            applied_at: Utc::now(),
        });
    }

    /// Fires the first matching fault, if any.
    async fn trip(&self, point: FaultPoint, script: Option<&str>) -> Result<(), StoreError> {
        if *self.offline.lock().await {
            return Err(StoreError::unavailable("connection refused (store offline)"));
        }

        let effect = {
            let mut faults = self.faults.lock().await;
            let Some(fault) = faults.iter_mut().find(|f| f.matches(point, script)) else {
                return Ok(());
            };
            if let Some(remaining) = fault.remaining.as_mut() {
                *remaining -= 1;
            }
            let effect = fault.effect;
            faults.retain(|f| f.remaining != Some(0));
            effect
        };

        log::debug!("Injected fault at {:?}: {:?}", point, effect);
        match effect {
            FaultEffect::Unavailable => Err(StoreError::unavailable(format!(
                "connection reset during {:?}",
                point
            ))),
            FaultEffect::Reject => Err(StoreError::rejected(format!(
                "statement rejected during {:?}",
                point
            ))),
            FaultEffect::Stall(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

fn missing_ledger() -> StoreError {
    StoreError::rejected(format!("relation \"{}\" does not exist", LEDGER_TABLE))
}

#[async_trait]
impl SchemaStore for MemSchemaStore {
    type Transaction = MemTransaction;
    type Lock = MemMigrationLock;

    async fn begin(&self) -> Result<MemTransaction, StoreError> {
        self.trip(FaultPoint::Begin, None).await?;
        let guard = self.tx_lock.clone().lock_owned().await;
        let snapshot = self.data.lock().await.clone();
        Ok(MemTransaction {
            snapshot,
            executed: Vec::new(),
            store: self.clone(),
            _guard: guard,
            consumed: false,
        })
    }

    async fn object_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.trip(FaultPoint::ObjectExists, None).await?;
        Ok(self.data.lock().await.schema.contains(name))
    }

    async fn ensure_ledger(&self) -> Result<(), StoreError> {
        self.trip(FaultPoint::EnsureLedger, None).await?;
        let mut data = self.data.lock().await;
        if !data.schema.contains(LEDGER_TABLE) {
            log::debug!("Creating ledger table {}", LEDGER_TABLE);
            data.schema.create_table(LEDGER_TABLE);
        }
        Ok(())
    }

    async fn fetch_ledger(&self) -> Result<Vec<LedgerRow>, StoreError> {
        self.trip(FaultPoint::FetchLedger, None).await?;
        let data = self.data.lock().await;
        if !data.schema.contains(LEDGER_TABLE) {
            return Err(missing_ledger());
        }
        let mut rows = data.ledger.clone();
        rows.sort_by_key(|row| row.version);
        Ok(rows)
    }

    async fn try_lock(&self) -> Result<Option<MemMigrationLock>, StoreError> {
        self.trip(FaultPoint::TryLock, None).await?;
        Ok(self
            .migration_lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(MemMigrationLock))
    }

    async fn unlock(&self, lock: MemMigrationLock) -> Result<(), StoreError> {
        drop(lock);
        Ok(())
    }
}

/// Holds the migration lock of a [`MemSchemaStore`] until dropped.
#[derive(Debug)]
pub struct MemMigrationLock(OwnedMutexGuard<()>);

/// A transaction on a [`MemSchemaStore`].
///
/// Holds the store's transaction lock for its entire duration.
pub struct MemTransaction {
    snapshot: StoreData,
    executed: Vec<String>,
    store: MemSchemaStore,
    _guard: OwnedMutexGuard<()>,
    consumed: bool,
}

#[async_trait]
impl StoreTransaction for MemTransaction {
    async fn execute(&mut self, script: &str) -> Result<(), StoreError> {
        self.store.trip(FaultPoint::Execute, Some(script)).await?;
        self.snapshot.schema.apply_script(script)?;
        if !self.snapshot.schema.contains(LEDGER_TABLE) {
            self.snapshot.ledger.clear();
        }
        self.executed.push(script.to_string());
        Ok(())
    }

    async fn insert_ledger_row(&mut self, version: Version, name: &str) -> Result<(), StoreError> {
        self.store.trip(FaultPoint::InsertLedgerRow, None).await?;
        if !self.snapshot.schema.contains(LEDGER_TABLE) {
            return Err(missing_ledger());
        }
        if self.snapshot.ledger.iter().any(|row| row.version == version) {
            return Err(StoreError::UniqueViolation(format!(
                "{}_pkey (version)=({})",
                LEDGER_TABLE, version
            )));
        }
        self.snapshot.ledger.push(LedgerRow {
            version,
            name: name.to_string(),
            applied_at: Utc::now(),
        });
        Ok(())
    }

    async fn delete_ledger_row(&mut self, version: Version) -> Result<u64, StoreError> {
        self.store.trip(FaultPoint::DeleteLedgerRow, None).await?;
        if !self.snapshot.schema.contains(LEDGER_TABLE) {
            return Err(missing_ledger());
        }
        let before = self.snapshot.ledger.len();
        self.snapshot.ledger.retain(|row| row.version != version);
        Ok((before - self.snapshot.ledger.len()) as u64)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.store.trip(FaultPoint::Commit, None).await?;
        self.consumed = true;
        *self.store.data.lock().await = std::mem::take(&mut self.snapshot);
        self.store
            .journal
            .lock()
            .await
            .extend(std::mem::take(&mut self.executed));
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.consumed = true;
        Ok(())
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        if !self.consumed {
            log::debug!(
                "MemTransaction dropped without commit() or rollback(). \
                 Changes were discarded (implicit rollback)."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_publishes_changes() {
        let store = MemSchemaStore::new();
        store.ensure_ledger().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.execute("CREATE TABLE uploads (id VARCHAR PRIMARY KEY)")
            .await
            .unwrap();
        tx.insert_ledger_row(1, "create_uploads_table").await.unwrap();
        assert!(!store.object_exists("uploads").await.unwrap());

        tx.commit().await.unwrap();
        assert!(store.object_exists("uploads").await.unwrap());
        assert_eq!(store.fetch_ledger().await.unwrap().len(), 1);
        assert_eq!(store.journal().await.len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_changes() {
        let store = MemSchemaStore::new();
        store.ensure_ledger().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.execute("CREATE TABLE uploads (id INT)").await.unwrap();
        tx.insert_ledger_row(1, "create_uploads_table").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(!store.object_exists("uploads").await.unwrap());
        assert!(store.fetch_ledger().await.unwrap().is_empty());
        assert!(store.journal().await.is_empty());
    }

    #[tokio::test]
    async fn dropped_transaction_discards_changes() {
        let store = MemSchemaStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.execute("CREATE TABLE uploads (id INT)").await.unwrap();
        }
        assert!(store.object_names().await.is_empty());
        // The transaction lock was released.
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_ledger_rows_are_unique_violations() {
        let store = MemSchemaStore::new();
        store.ensure_ledger().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_ledger_row(1, "a").await.unwrap();
        let err = tx.insert_ledger_row(1, "a").await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn fetching_a_missing_ledger_is_rejected() {
        let store = MemSchemaStore::new();
        let err = store.fetch_ledger().await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn migration_lock_is_exclusive() {
        let store = MemSchemaStore::new();
        let lock = store.try_lock().await.unwrap().expect("first lock");
        assert!(store.try_lock().await.unwrap().is_none());
        store.unlock(lock).await.unwrap();
        assert!(store.try_lock().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn script_faults_fire_a_limited_number_of_times() {
        let store = MemSchemaStore::new();
        store
            .inject(Fault::on_script("CREATE INDEX", FaultEffect::Unavailable).times(1))
            .await;
        store.run_script("CREATE TABLE a (id INT)").await.unwrap();

        let err = store
            .run_script("CREATE INDEX idx_a ON a(id)")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.run_script("CREATE INDEX idx_a ON a(id)").await.is_ok());
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = MemSchemaStore::new();
        store.set_offline(true).await;
        assert!(matches!(
            store.object_exists("a").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false).await;
        assert!(store.object_exists("a").await.is_ok());
    }

    #[tokio::test]
    async fn dropping_the_ledger_table_clears_its_rows() {
        let store = MemSchemaStore::new();
        store.seed_ledger_row(1, "a").await;
        store.run_script("DROP TABLE schema_migrations").await.unwrap();
        assert!(store.ledger_rows().await.is_empty());
    }
}
