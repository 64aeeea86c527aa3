//! Cross-process exclusion through a PostgreSQL session advisory lock.

use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use strata_core::LEDGER_TABLE;

/// The advisory lock key shared by every runner migrating the same database.
///
/// Derived from the ledger table name so it does not collide with keys
/// chosen by the application.
pub fn migration_lock_key() -> i64 {
    let digest = Sha256::digest(LEDGER_TABLE.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Holds the migration advisory lock on a dedicated pool connection.
///
/// Session advisory locks belong to the connection that took them. If the
/// guard is dropped without [`PgMigrationLock::release`] (a crash, a
/// cancelled future) the connection is detached from the pool and closed,
/// which makes the server release the lock.
pub struct PgMigrationLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

impl PgMigrationLock {
    pub(crate) async fn try_acquire(pool: &PgPool, key: i64) -> Result<Option<Self>, sqlx::Error> {
        let mut lock = Self {
            conn: Some(pool.acquire().await?),
            key,
        };
        if !lock.call("SELECT pg_try_advisory_lock($1)").await? {
            // Not held by this session; the connection can go back to the pool.
            lock.conn = None;
            return Ok(None);
        }
        log::debug!("Acquired advisory lock {}", key);
        Ok(Some(lock))
    }

    pub(crate) async fn release(mut self) -> Result<(), sqlx::Error> {
        if !self.call("SELECT pg_advisory_unlock($1)").await? {
            log::warn!(
                "Advisory lock {} was not held by this session when released",
                self.key
            );
        }
        self.conn = None;
        Ok(())
    }

    /// Runs a boolean advisory lock function on the held connection.
    async fn call(&mut self, sql: &'static str) -> Result<bool, sqlx::Error> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(false);
        };
        let (result,): (bool,) = sqlx::query_as(sql)
            .bind(self.key)
            .fetch_one(&mut **conn)
            .await?;
        Ok(result)
    }
}

impl Drop for PgMigrationLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            log::warn!(
                "Migration lock {} dropped without release, closing its connection",
                self.key
            );
            drop(conn.detach());
        }
    }
}

impl std::fmt::Debug for PgMigrationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgMigrationLock")
            .field("key", &self.key)
            .field("held", &self.conn.is_some())
            .finish()
    }
}
