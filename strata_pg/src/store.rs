use async_trait::async_trait;
use chrono::NaiveDateTime;
use crate::error::classify;
use crate::lock::{PgMigrationLock, migration_lock_key};
use sqlx::{Executor, PgConnection, PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use strata_core::{LedgerRow, SchemaStore, StoreError, StoreTransaction, Version};

const CREATE_LEDGER_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name VARCHAR NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT (now() AT TIME ZONE 'utc')
    )
"#;

/// A PostgreSQL implementation of [`SchemaStore`].
///
/// Objects are looked up in the connection's `current_schema()`. The
/// migration lock is a session advisory lock, so it is released by the
/// server if the holding process dies.
#[derive(Clone, Debug)]
pub struct PgSchemaStore {
    pool: PgPool,
    lock_key: i64,
    statement_timeout: Option<Duration>,
}

impl PgSchemaStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_key: migration_lock_key(),
            statement_timeout: None,
        }
    }

    /// Bounds every statement of a migration transaction on the server.
    ///
    /// The runner stops waiting when its DDL budget elapses, but PostgreSQL
    /// keeps executing the statement until told otherwise. Setting this to
    /// the same budget makes the server cancel the statement and abort the
    /// transaction, so its locks are gone before the runner releases the
    /// migration lock.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Overrides the advisory lock key.
    pub fn with_lock_key(mut self, lock_key: i64) -> Self {
        self.lock_key = lock_key;
        self
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SchemaStore for PgSchemaStore {
    type Transaction = PgStoreTransaction;
    type Lock = PgMigrationLock;

    async fn begin(&self) -> Result<PgStoreTransaction, StoreError> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        if let Some(timeout) = self.statement_timeout {
            let conn: &mut PgConnection = &mut tx;
            conn.execute(sqlx::raw_sql(&statement_timeout_sql(timeout)))
                .await
                .map_err(classify)?;
        }
        Ok(PgStoreTransaction { tx })
    }

    async fn object_exists(&self, name: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM pg_catalog.pg_class c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = current_schema()
                  AND c.relname = $1
            )
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(exists)
    }

    async fn ensure_ledger(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_LEDGER_TABLE)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn fetch_ledger(&self) -> Result<Vec<LedgerRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT version::BIGINT AS version, name, applied_at
            FROM schema_migrations
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.iter()
            .map(|row| {
                Ok(LedgerRow {
                    version: row.try_get("version")?,
                    name: row.try_get("name")?,
                    applied_at: row.try_get::<NaiveDateTime, _>("applied_at")?.and_utc(),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(classify)
    }

    async fn try_lock(&self) -> Result<Option<PgMigrationLock>, StoreError> {
        PgMigrationLock::try_acquire(&self.pool, self.lock_key)
            .await
            .map_err(classify)
    }

    async fn unlock(&self, lock: PgMigrationLock) -> Result<(), StoreError> {
        lock.release().await.map_err(classify)
    }
}

/// `SET LOCAL` takes no bind parameters. Zero would disable the timeout.
fn statement_timeout_sql(timeout: Duration) -> String {
    format!(
        "SET LOCAL statement_timeout = {}",
        timeout.as_millis().max(1)
    )
}

/// The ledger's `version` column is `INTEGER`.
fn ledger_version(version: Version) -> Result<i32, StoreError> {
    i32::try_from(version).map_err(|_| {
        StoreError::rejected(format!(
            "version {} does not fit the ledger's INTEGER column",
            version
        ))
    })
}

/// A transaction on a [`PgSchemaStore`].
///
/// Dropping it without committing rolls it back when the connection is
/// returned to the pool.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn execute(&mut self, script: &str) -> Result<(), StoreError> {
        let conn: &mut PgConnection = &mut self.tx;
        conn.execute(sqlx::raw_sql(script))
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn insert_ledger_row(&mut self, version: Version, name: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schema_migrations (version, name, applied_at)
            VALUES ($1, $2, now() AT TIME ZONE 'utc')
            "#,
        )
        .bind(ledger_version(version)?)
        .bind(name)
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn delete_ledger_row(&mut self, version: Version) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
            .bind(version)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(classify)
    }
}
