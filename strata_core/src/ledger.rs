//! The persistent record of applied migrations.

use chrono::{DateTime, Utc};
use crate::catalog::Catalog;
use crate::definition::Version;
use crate::error::{MigrationError, StoreError};
use crate::guard::{Budget, OperationGuard};
use crate::store::{LEDGER_TABLE, LedgerRow, SchemaStore, StoreTransaction};
use serde::Serialize;

/// Record of a migration that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// The version number of the migration.
    pub version: Version,
    /// The human-readable name of the migration.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        LedgerEntry {
            version: row.version,
            name: row.name,
            applied_at: row.applied_at,
        }
    }
}

/// Typed access to the `schema_migrations` table.
pub struct MigrationLedger<'a, S: SchemaStore> {
    store: &'a S,
    guard: &'a OperationGuard,
}

impl<'a, S: SchemaStore> MigrationLedger<'a, S> {
    pub(crate) fn new(store: &'a S, guard: &'a OperationGuard) -> Self {
        Self { store, guard }
    }

    /// Creates the ledger table if it does not exist.
    pub async fn initialize(&self) -> Result<(), MigrationError> {
        self.guard
            .run(
                "initialize_ledger",
                Budget::Metadata,
                self.store.ensure_ledger(),
            )
            .await?;
        log::debug!("Ledger table {} is ready", LEDGER_TABLE);
        Ok(())
    }

    /// Returns applied migrations, ascending by version.
    ///
    /// Returns an empty list when the ledger table does not exist yet.
    pub async fn applied(&self) -> Result<Vec<LedgerEntry>, MigrationError> {
        let exists = self
            .guard
            .run(
                "read_ledger",
                Budget::Metadata,
                self.store.object_exists(LEDGER_TABLE),
            )
            .await?;
        if !exists {
            log::debug!("Ledger table {} does not exist yet", LEDGER_TABLE);
            return Ok(Vec::new());
        }

        let rows = self
            .guard
            .run("read_ledger", Budget::Metadata, self.store.fetch_ledger())
            .await?;

        let mut entries: Vec<LedgerEntry> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.version <= 0 {
                return Err(MigrationError::LedgerCorrupt(format!(
                    "impossible version {} ({}) recorded",
                    row.version, row.name
                )));
            }
            if let Some(prev) = entries.last() {
                if row.version == prev.version {
                    return Err(MigrationError::LedgerCorrupt(format!(
                        "version {} recorded more than once",
                        row.version
                    )));
                }
                if row.version < prev.version {
                    return Err(MigrationError::LedgerCorrupt(format!(
                        "version {} returned after {}",
                        row.version, prev.version
                    )));
                }
            }
            entries.push(row.into());
        }
        Ok(entries)
    }

    /// Records `version` inside `tx`.
    pub async fn record(
        &self,
        tx: &mut S::Transaction,
        version: Version,
        name: &str,
    ) -> Result<(), MigrationError> {
        let result = self
            .guard
            .run(
                "record_migration",
                Budget::Metadata,
                tx.insert_ledger_row(version, name),
            )
            .await;
        match result {
            Err(MigrationError::StoreRejected {
                source: StoreError::UniqueViolation(_),
                ..
            }) => Err(MigrationError::DuplicateVersion(version)),
            other => other,
        }
    }

    /// Removes `version` inside `tx`.
    pub async fn remove(
        &self,
        tx: &mut S::Transaction,
        version: Version,
    ) -> Result<(), MigrationError> {
        let removed = self
            .guard
            .run(
                "remove_migration_record",
                Budget::Metadata,
                tx.delete_ledger_row(version),
            )
            .await?;
        if removed == 0 {
            return Err(MigrationError::NotFound(version));
        }
        Ok(())
    }
}

/// Checks that `entries` form a prefix of `catalog`, version by version and
/// name by name.
pub fn verify_prefix(entries: &[LedgerEntry], catalog: &Catalog) -> Result<(), MigrationError> {
    let definitions = catalog.list();
    for (index, entry) in entries.iter().enumerate() {
        let Some(expected) = definitions.get(index) else {
            return Err(MigrationError::LedgerCorrupt(format!(
                "version {} ({}) is recorded but not defined in the catalog",
                entry.version, entry.name
            )));
        };
        if entry.version != expected.version {
            return Err(MigrationError::LedgerCorrupt(match catalog.get(entry.version) {
                Some(_) => format!(
                    "version {} is recorded while {} is not",
                    entry.version, expected
                ),
                None => format!(
                    "version {} ({}) is recorded but not defined in the catalog",
                    entry.version, entry.name
                ),
            }));
        }
        if entry.name != expected.name {
            return Err(MigrationError::LedgerCorrupt(format!(
                "version {} is recorded as `{}` but the catalog names it `{}`",
                entry.version, entry.name, expected.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::definition::MigrationDefinition;
    use super::*;

    const FIXTURE: &[MigrationDefinition] = &[
        MigrationDefinition::new(1, "create_uploads_table", "", ""),
        MigrationDefinition::new(2, "create_incidents_table", "", ""),
        MigrationDefinition::new(4, "create_indexes", "", ""),
    ];

    fn entry(version: Version, name: &str) -> LedgerEntry {
        LedgerEntry {
            version,
            name: name.to_string(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn empty_ledger_is_a_prefix() {
        let catalog = Catalog::from_static(FIXTURE);
        assert!(verify_prefix(&[], &catalog).is_ok());
    }

    #[test]
    fn leading_entries_are_a_prefix() {
        let catalog = Catalog::from_static(FIXTURE);
        let entries = vec![
            entry(1, "create_uploads_table"),
            entry(2, "create_incidents_table"),
        ];
        assert!(verify_prefix(&entries, &catalog).is_ok());
    }

    #[test]
    fn hole_below_highest_applied_is_corrupt() {
        let catalog = Catalog::from_static(FIXTURE);
        let entries = vec![entry(1, "create_uploads_table"), entry(4, "create_indexes")];
        let err = verify_prefix(&entries, &catalog).unwrap_err();
        assert!(matches!(err, MigrationError::LedgerCorrupt(_)));
        assert!(err.to_string().contains("2 (create_incidents_table)"));
    }

    #[test]
    fn unknown_version_is_corrupt() {
        let catalog = Catalog::from_static(FIXTURE);
        let entries = vec![entry(1, "create_uploads_table"), entry(3, "mystery")];
        let err = verify_prefix(&entries, &catalog).unwrap_err();
        assert!(err.to_string().contains("not defined in the catalog"));
    }

    #[test]
    fn entries_beyond_the_catalog_are_corrupt() {
        let catalog = Catalog::new(FIXTURE[..1].to_vec());
        let entries = vec![
            entry(1, "create_uploads_table"),
            entry(2, "create_incidents_table"),
        ];
        assert!(matches!(
            verify_prefix(&entries, &catalog),
            Err(MigrationError::LedgerCorrupt(_))
        ));
    }

    #[test]
    fn renamed_migration_is_corrupt() {
        let catalog = Catalog::from_static(FIXTURE);
        let entries = vec![entry(1, "create_upload_table")];
        let err = verify_prefix(&entries, &catalog).unwrap_err();
        assert!(err.to_string().contains("create_upload_table"));
    }
}
