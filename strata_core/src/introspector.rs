//! Ledger-independent checks against the store's actual objects.

use crate::catalog::Catalog;
use crate::definition::Version;
use crate::error::MigrationError;
use crate::guard::{Budget, OperationGuard};
use crate::ledger::LedgerEntry;
use crate::store::SchemaStore;
use serde::Serialize;

/// A disagreement between the ledger and the objects present in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaDrift {
    /// An applied migration declares an object the store does not have.
    Missing {
        /// The migration declaring the object.
        version: Version,
        /// The absent object.
        object: String,
    },
    /// A pending migration declares an object the store already has.
    Unexpected {
        /// The migration declaring the object.
        version: Version,
        /// The present object.
        object: String,
    },
}

/// Answers whether objects exist, without consulting the ledger.
pub struct SchemaIntrospector<'a, S: SchemaStore> {
    store: &'a S,
    guard: &'a OperationGuard,
}

impl<'a, S: SchemaStore> SchemaIntrospector<'a, S> {
    pub(crate) fn new(store: &'a S, guard: &'a OperationGuard) -> Self {
        Self { store, guard }
    }

    /// Returns whether a table, index or view called `object` exists.
    pub async fn exists(&self, object: &str) -> Result<bool, MigrationError> {
        self.guard
            .run(
                "introspect_object",
                Budget::Metadata,
                self.store.object_exists(object),
            )
            .await
    }

    /// Refuses to proceed when the ledger is empty but objects created by
    /// the first migration that declares any are already present.
    ///
    /// Such a store was set up by something other than this engine, or its
    /// ledger was lost. Neither "already migrated" nor "run everything" is a
    /// safe assumption. A catalog that declares no objects at all cannot be
    /// checked; that is logged and allowed.
    pub async fn first_run_guard(&self, catalog: &Catalog) -> Result<(), MigrationError> {
        let Some(first) = catalog.list().iter().find(|m| !m.objects.is_empty()) else {
            if !catalog.is_empty() {
                log::warn!(
                    "No migration declares its objects, an untracked schema cannot be detected"
                );
            }
            return Ok(());
        };
        for object in first.objects {
            if self.exists(object).await? {
                log::warn!(
                    "Found `{}` (declared by migration {}) but the ledger is empty",
                    object,
                    first
                );
                return Err(MigrationError::UntrackedSchema {
                    object: object.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Compares declared objects against the store.
    ///
    /// Applied migrations must have all their objects, pending migrations
    /// none of theirs.
    pub async fn verify(
        &self,
        catalog: &Catalog,
        applied: &[LedgerEntry],
    ) -> Result<Vec<SchemaDrift>, MigrationError> {
        let mut drift = Vec::new();
        for migration in catalog.list() {
            let is_applied = applied.iter().any(|e| e.version == migration.version);
            for object in migration.objects {
                let exists = self.exists(object).await?;
                if is_applied && !exists {
                    drift.push(SchemaDrift::Missing {
                        version: migration.version,
                        object: object.to_string(),
                    });
                } else if !is_applied && exists {
                    drift.push(SchemaDrift::Unexpected {
                        version: migration.version,
                        object: object.to_string(),
                    });
                }
            }
        }
        Ok(drift)
    }
}
