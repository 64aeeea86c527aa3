//! # Strata
//!
//! Versioned schema migrations for relational stores.
//!
//! A [`Catalog`] of [`MigrationDefinition`]s is compiled into the binary. A
//! [`MigrationRunner`] brings a [`SchemaStore`] to the catalog's latest
//! version (or back to an earlier one), recording every applied version in
//! the `schema_migrations` ledger table inside the same transaction as the
//! migration's script.

#![deny(missing_docs)]

mod catalog;
mod config;
mod definition;
mod error;
mod guard;
mod introspector;
mod ledger;
mod observer;
mod report;
mod runner;
mod store;

pub use catalog::Catalog;
pub use config::RunnerConfig;
pub use definition::{MigrationDefinition, Version};
pub use error::{BoxError, ErrorKind, MigrationError, RunError, StoreError};
pub use introspector::{SchemaDrift, SchemaIntrospector};
pub use ledger::{LedgerEntry, MigrationLedger, verify_prefix};
pub use observer::{Direction, MigrationEvent, MigrationObserver, MigrationOutcome};
pub use report::{MigrationReport, MigrationStatus, PendingMigration};
pub use runner::MigrationRunner;
pub use store::{LEDGER_TABLE, LedgerRow, SchemaStore, StoreTransaction};

pub mod prelude {
    //! The prelude module for the `strata_core` crate.
    pub use super::{
        Catalog, Direction, ErrorKind, LedgerEntry, MigrationDefinition, MigrationError,
        MigrationEvent, MigrationObserver, MigrationReport, MigrationRunner, MigrationStatus,
        RunError, RunnerConfig, SchemaDrift, SchemaStore, StoreError, StoreTransaction, Version,
    };
}
