//! Store backend definitions.
//!
//! A [`SchemaStore`] is the only thing the engine knows about the database.
//! Implementations own the dialect: how scripts are executed, how the ledger
//! table is laid out, how objects are looked up and how runners exclude each
//! other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::definition::Version;
use crate::error::StoreError;

/// Name of the table holding the migration ledger.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// A raw ledger row as returned by the store, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    /// The recorded version.
    pub version: Version,
    /// The recorded name.
    pub name: String,
    /// When the row was written.
    pub applied_at: DateTime<Utc>,
}

/// A trait that defines the behavior of a schema store backend.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// The transaction type handed out by [`SchemaStore::begin`].
    type Transaction: StoreTransaction;

    /// Proof that the migration lock is held. Dropping it without calling
    /// [`SchemaStore::unlock`] must still release the lock eventually.
    type Lock: Send;

    /// Starts a new transaction.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    /// Returns whether a table, index or view with the given name exists.
    async fn object_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Creates the ledger table if it does not exist.
    async fn ensure_ledger(&self) -> Result<(), StoreError>;

    /// Reads every ledger row, ordered by version ascending.
    async fn fetch_ledger(&self) -> Result<Vec<LedgerRow>, StoreError>;

    /// Attempts to take the migration lock without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    async fn try_lock(&self) -> Result<Option<Self::Lock>, StoreError>;

    /// Releases a lock obtained from [`SchemaStore::try_lock`].
    async fn unlock(&self, lock: Self::Lock) -> Result<(), StoreError>;
}

/// A transaction on a [`SchemaStore`].
///
/// Dropping a transaction without committing must discard its effects.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Executes a script, which may contain several statements.
    async fn execute(&mut self, script: &str) -> Result<(), StoreError>;

    /// Inserts a ledger row. Fails with [`StoreError::UniqueViolation`] if
    /// the version is already recorded.
    async fn insert_ledger_row(&mut self, version: Version, name: &str)
    -> Result<(), StoreError>;

    /// Deletes a ledger row, returning the number of rows removed.
    async fn delete_ledger_row(&mut self, version: Version) -> Result<u64, StoreError>;

    /// Commits the transaction.
    async fn commit(self) -> Result<(), StoreError>;

    /// Rolls back the transaction.
    async fn rollback(self) -> Result<(), StoreError>;
}
