//! The incident-analytics schema.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strata_core::MigrationRunner;
//! use strata_pg::{migrations, PgSchemaStore};
//!
//! let pool = PgPool::connect("postgres://...").await?;
//! let runner = MigrationRunner::new(PgSchemaStore::new(pool), migrations::catalog());
//!
//! let report = runner.apply_all().await?;
//! println!("Applied {:?}", report.completed);
//! ```
//!
//! # Adding New Migrations
//!
//! 1. Create a new file `mXXX_description.rs` in this directory
//! 2. Define a `MigrationDefinition` constant with `up`, `down` and the objects it creates
//! 3. Add it to the end of the `MIGRATIONS` array in this file

mod m001_create_uploads_table;
mod m002_create_incidents_table;
mod m003_create_indexes;
mod m004_create_analytics_views;

pub use m001_create_uploads_table::CREATE_UPLOADS_TABLE;
pub use m002_create_incidents_table::CREATE_INCIDENTS_TABLE;
pub use m003_create_indexes::CREATE_INDEXES;
pub use m004_create_analytics_views::CREATE_ANALYTICS_VIEWS;

use strata_core::{Catalog, MigrationDefinition};

/// All migrations in order. Add new migrations to the end.
pub const MIGRATIONS: &[MigrationDefinition] = &[
    CREATE_UPLOADS_TABLE,
    CREATE_INCIDENTS_TABLE,
    CREATE_INDEXES,
    CREATE_ANALYTICS_VIEWS,
];

/// The incident schema as a [`Catalog`].
pub fn catalog() -> Catalog {
    Catalog::from_static(MIGRATIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_valid() {
        let catalog = catalog();
        catalog.validate().expect("Catalog should be valid");
        assert_eq!(catalog.latest_version(), 4);
    }

    #[test]
    fn versions_are_contiguous() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn versions_fit_the_ledger_column() {
        for migration in MIGRATIONS {
            assert!(
                migration.version <= i32::MAX as i64,
                "Migration {} does not fit the INTEGER ledger column",
                migration
            );
        }
    }

    #[test]
    fn every_migration_declares_its_objects() {
        for migration in MIGRATIONS {
            assert!(
                !migration.objects.is_empty(),
                "Migration {} declares no objects",
                migration
            );
        }
    }

    #[test]
    fn down_scripts_drop_every_declared_object() {
        for migration in MIGRATIONS {
            for object in migration.objects {
                assert!(
                    migration.down.contains(object),
                    "Migration {} does not drop {}",
                    migration,
                    object
                );
            }
        }
    }

    #[test]
    fn scripts_are_rerunnable() {
        for migration in MIGRATIONS {
            assert!(
                !migration.up.contains("CREATE TABLE ") || migration.up.contains("IF NOT EXISTS"),
                "Migration {} creates a table without IF NOT EXISTS",
                migration
            );
            assert!(
                !migration.up.contains("VIEW IF NOT EXISTS"),
                "Migration {} uses syntax PostgreSQL does not support",
                migration
            );
        }
    }
}
