//! # Strata

#![deny(missing_docs)]

pub use strata_core::*;

#[cfg(feature = "mem")]
/// The in-memory store.
pub mod mem {
    //! Contains the in-memory `SchemaStore` for tests and development.
    pub use strata_mem::*;
}

#[cfg(feature = "postgres")]
/// The PostgreSQL store and the incident catalog.
pub mod postgres {
    //! Contains the PostgreSQL `SchemaStore` and the incident migrations.
    pub use strata_pg::*;
}

pub mod prelude {
    //! The prelude module for the `strata` crate.
    pub use strata_core::prelude::*;

    #[cfg(feature = "mem")]
    pub use super::mem::MemSchemaStore;
    #[cfg(feature = "postgres")]
    pub use super::postgres::PgSchemaStore;
}
