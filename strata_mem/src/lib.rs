//! # Strata memory store
//!
//! An in-memory [`SchemaStore`](strata_core::SchemaStore), primarily for
//! testing migration catalogs and the runner without a database.
//!
//! ```ignore
//! use strata_core::{Catalog, MigrationRunner};
//! use strata_mem::{Fault, FaultEffect, MemSchemaStore};
//!
//! let store = MemSchemaStore::new();
//! store
//!     .inject(Fault::on_script("CREATE INDEX", FaultEffect::Reject))
//!     .await;
//!
//! let runner = MigrationRunner::new(store.clone(), Catalog::from_static(MIGRATIONS));
//! let err = runner.apply_all().await.unwrap_err();
//! assert_eq!(err.completed, vec![1, 2]);
//! ```

#![deny(missing_docs)]

mod sql;
mod store;

pub use sql::ObjectKind;
pub use store::*;
