//! The compiled, ordered list of migrations.

use crate::definition::{MigrationDefinition, Version};
use crate::error::MigrationError;
use crate::ledger::LedgerEntry;
use std::borrow::Cow;
use std::collections::HashSet;

/// An immutable, ordered list of migration definitions.
///
/// The catalog never reorders what it was given. Whether the order is valid
/// is checked by [`Catalog::validate`], which the runner calls before every
/// mutating operation.
#[derive(Debug, Clone)]
pub struct Catalog {
    migrations: Cow<'static, [MigrationDefinition]>,
}

impl Catalog {
    /// Creates a catalog from owned definitions.
    pub fn new(migrations: Vec<MigrationDefinition>) -> Self {
        Self {
            migrations: Cow::Owned(migrations),
        }
    }

    /// Creates a catalog borrowing a static list, e.g. a `const` array.
    pub const fn from_static(migrations: &'static [MigrationDefinition]) -> Self {
        Self {
            migrations: Cow::Borrowed(migrations),
        }
    }

    /// All migrations, in catalog order.
    pub fn list(&self) -> &[MigrationDefinition] {
        &self.migrations
    }

    /// Finds a migration by version.
    pub fn get(&self, version: Version) -> Option<&MigrationDefinition> {
        self.migrations.iter().find(|m| m.version == version)
    }

    /// The first migration, if any.
    pub fn first(&self) -> Option<&MigrationDefinition> {
        self.migrations.first()
    }

    /// The highest version in the catalog, or 0 when empty.
    pub fn latest_version(&self) -> Version {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns `true` if the catalog has no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Checks that versions are positive and strictly increasing and that
    /// names are unique.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let mut prev: Option<&MigrationDefinition> = None;
        let mut names = HashSet::new();
        for migration in self.migrations.iter() {
            if migration.version <= 0 {
                return Err(MigrationError::CatalogInvalid(format!(
                    "migration {} has a non-positive version",
                    migration
                )));
            }
            if let Some(prev) = prev {
                if migration.version == prev.version {
                    return Err(MigrationError::CatalogInvalid(format!(
                        "version {} is defined twice ({} and {})",
                        migration.version, prev.name, migration.name
                    )));
                }
                if migration.version < prev.version {
                    return Err(MigrationError::CatalogInvalid(format!(
                        "migration {} is declared after {}",
                        migration, prev
                    )));
                }
            }
            if !names.insert(migration.name) {
                return Err(MigrationError::CatalogInvalid(format!(
                    "name `{}` is used by more than one migration",
                    migration.name
                )));
            }
            prev = Some(migration);
        }
        Ok(())
    }

    /// Migrations not present in `applied`, in catalog order.
    pub fn pending(&self, applied: &[LedgerEntry]) -> Vec<&MigrationDefinition> {
        let applied_versions: HashSet<Version> = applied.iter().map(|e| e.version).collect();
        self.migrations
            .iter()
            .filter(|m| !applied_versions.contains(&m.version))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use super::*;

    const FIXTURE: &[MigrationDefinition] = &[
        MigrationDefinition::new(1, "create_a", "CREATE TABLE a (id INT)", "DROP TABLE a"),
        MigrationDefinition::new(2, "create_b", "CREATE TABLE b (id INT)", "DROP TABLE b"),
        MigrationDefinition::new(5, "create_c", "CREATE TABLE c (id INT)", "DROP TABLE c"),
    ];

    fn entry(version: Version, name: &str) -> LedgerEntry {
        LedgerEntry {
            version,
            name: name.to_string(),
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn list_is_referentially_stable() {
        let catalog = Catalog::from_static(FIXTURE);
        assert!(std::ptr::eq(catalog.list(), catalog.list()));
        assert_eq!(catalog.list(), FIXTURE);
    }

    #[test]
    fn gaps_are_allowed() {
        let catalog = Catalog::from_static(FIXTURE);
        assert!(catalog.validate().is_ok());
        assert_eq!(catalog.latest_version(), 5);
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let catalog = Catalog::new(vec![
            MigrationDefinition::new(1, "one", "", ""),
            MigrationDefinition::new(1, "uno", "", ""),
        ]);
        let err = catalog.validate().unwrap_err();
        assert!(matches!(err, MigrationError::CatalogInvalid(_)));
    }

    #[test]
    fn decreasing_versions_are_rejected() {
        let catalog = Catalog::new(vec![
            MigrationDefinition::new(2, "two", "", ""),
            MigrationDefinition::new(1, "one", "", ""),
        ]);
        assert!(matches!(
            catalog.validate(),
            Err(MigrationError::CatalogInvalid(_))
        ));
    }

    #[test]
    fn non_positive_versions_are_rejected() {
        let catalog = Catalog::new(vec![MigrationDefinition::new(0, "zero", "", "")]);
        assert!(matches!(
            catalog.validate(),
            Err(MigrationError::CatalogInvalid(_))
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let catalog = Catalog::new(vec![
            MigrationDefinition::new(1, "same", "", ""),
            MigrationDefinition::new(2, "same", "", ""),
        ]);
        assert!(matches!(
            catalog.validate(),
            Err(MigrationError::CatalogInvalid(_))
        ));
    }

    #[test]
    fn pending_excludes_applied_in_order() {
        let catalog = Catalog::from_static(FIXTURE);
        let pending = catalog.pending(&[entry(1, "create_a")]);
        let versions: Vec<Version> = pending.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![2, 5]);
    }

    #[test]
    fn empty_catalog_has_version_zero() {
        let catalog = Catalog::new(Vec::new());
        assert!(catalog.is_empty());
        assert_eq!(catalog.latest_version(), 0);
        assert!(catalog.validate().is_ok());
    }
}
