//! Migration definitions.

use serde::Serialize;

/// The version number type used by migrations and the ledger.
///
/// Stores may hold a narrower range: the PostgreSQL ledger column is
/// `INTEGER`, so versions there must not exceed `i32::MAX`.
pub type Version = i64;

/// A single versioned schema change, compiled into the binary.
///
/// Definitions are plain data: the scripts are executed verbatim by the
/// [`SchemaStore`](crate::store::SchemaStore) the runner was built with, so
/// they must be written in that store's dialect.
///
/// # Example
///
/// ```rust
/// use strata_core::MigrationDefinition;
///
/// const CREATE_UPLOADS: MigrationDefinition = MigrationDefinition::new(
///     1,
///     "create_uploads_table",
///     "CREATE TABLE IF NOT EXISTS uploads (id VARCHAR PRIMARY KEY)",
///     "DROP TABLE IF EXISTS uploads",
/// )
/// .with_objects(&["uploads"]);
///
/// assert_eq!(CREATE_UPLOADS.version, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MigrationDefinition {
    /// Unique version number. Defines the total order of the catalog.
    pub version: Version,
    /// Human-readable name (e.g., "create_uploads_table").
    pub name: &'static str,
    /// The forward script.
    #[serde(skip)]
    pub up: &'static str,
    /// The structural inverse of `up`.
    #[serde(skip)]
    pub down: &'static str,
    /// Names of the store objects created by `up`.
    ///
    /// The introspector uses these to detect schemas that exist without a
    /// ledger and to report drift between the ledger and the store.
    pub objects: &'static [&'static str],
}

impl MigrationDefinition {
    /// Creates a definition with no declared objects.
    pub const fn new(
        version: Version,
        name: &'static str,
        up: &'static str,
        down: &'static str,
    ) -> Self {
        Self {
            version,
            name,
            up,
            down,
            objects: &[],
        }
    }

    /// Declares the objects created by this migration's `up` script.
    pub const fn with_objects(mut self, objects: &'static [&'static str]) -> Self {
        self.objects = objects;
        self
    }
}

impl std::fmt::Display for MigrationDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.version, self.name)
    }
}
