//! # Strata postgres store

#![deny(missing_docs)]

mod error;
mod lock;
mod store;

/// The incident-analytics migration catalog
pub mod migrations;

pub use lock::{PgMigrationLock, migration_lock_key};
pub use store::{PgSchemaStore, PgStoreTransaction};
