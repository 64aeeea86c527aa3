//! Error taxonomy for the migration engine.
//!
//! Store implementations classify their failures once, at the point of
//! origin, into a [`StoreError`]. The runner then maps those into
//! [`MigrationError`] variants carrying the operation name and, where one
//! exists, the migration identity.

use crate::definition::Version;
use std::time::Duration;

/// A boxed error used as the source of store failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by a [`SchemaStore`](crate::store::SchemaStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the connection was lost.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] BoxError),

    /// The store refused the statement (syntax, missing relation, permissions...).
    #[error("statement rejected: {0}")]
    Rejected(#[source] BoxError),

    /// A unique constraint was violated.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
}

impl StoreError {
    /// Builds an [`StoreError::Unavailable`] from a message.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into().into())
    }

    /// Builds an [`StoreError::Rejected`] from a message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into().into())
    }
}

/// The classification of a [`MigrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection or transport failure.
    StoreUnavailable,
    /// An operation exceeded its time budget.
    OperationTimeout,
    /// Another runner holds the migration lock.
    LockUnavailable,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// The store rejected a statement issued outside of a migration.
    StoreRejected,
    /// A forward script or its ledger write failed.
    MigrationApplyFailed,
    /// A backward script or its ledger delete failed.
    MigrationRollbackFailed,
    /// The ledger violates the prefix or ordering invariant.
    LedgerCorrupt,
    /// The compiled catalog is invalid.
    CatalogInvalid,
    /// Schema objects exist although the ledger is empty.
    UntrackedSchema,
    /// A ledger entry already exists for the version.
    DuplicateVersion,
    /// No ledger entry or definition exists for the version.
    NotFound,
    /// The requested single step would break the prefix invariant.
    OutOfOrder,
    /// The rollback target is not a valid version.
    InvalidTarget,
}

impl ErrorKind {
    /// Returns `true` when re-invoking the operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::StoreUnavailable | ErrorKind::OperationTimeout | ErrorKind::LockUnavailable
        )
    }
}

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// The store could not serve the operation.
    #[error("{operation}: {source}")]
    StoreUnavailable {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// The store rejected a statement issued by the engine itself.
    #[error("{operation}: {source}")]
    StoreRejected {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// A store call did not finish within its budget.
    #[error("{operation} timed out after {timeout:?}")]
    OperationTimeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The runner's cancellation token fired.
    #[error("{operation} cancelled")]
    Cancelled {
        /// The operation in flight when cancellation was observed.
        operation: &'static str,
    },

    /// The migration lock could not be acquired in time.
    #[error("migration lock not acquired within {waited:?}")]
    LockUnavailable {
        /// How long the runner waited for the lock.
        waited: Duration,
    },

    /// A migration failed to apply. Nothing of it was committed.
    #[error("Migration {version} ({name}) failed to apply: {cause}")]
    ApplyFailed {
        /// The version of the migration that failed.
        version: Version,
        /// The name of the migration.
        name: String,
        /// The failure.
        #[source]
        cause: Box<MigrationError>,
    },

    /// A migration failed to roll back. Nothing of the rollback was committed.
    #[error("Migration {version} ({name}) failed to roll back: {cause}")]
    RollbackFailed {
        /// The version of the migration that failed.
        version: Version,
        /// The name of the migration.
        name: String,
        /// The failure.
        #[source]
        cause: Box<MigrationError>,
    },

    /// The ledger content is inconsistent.
    #[error("ledger corrupt: {0}")]
    LedgerCorrupt(String),

    /// The compiled catalog is inconsistent.
    #[error("catalog invalid: {0}")]
    CatalogInvalid(String),

    /// The ledger is empty but the schema already exists.
    #[error("object `{object}` exists but no migrations are recorded; refusing to guess the schema state")]
    UntrackedSchema {
        /// The object found in the store.
        object: String,
    },

    /// The version is already recorded in the ledger.
    #[error("version {0} is already recorded")]
    DuplicateVersion(Version),

    /// The version is not recorded, or not defined in the catalog.
    #[error("version {0} not found")]
    NotFound(Version),

    /// A single step was requested for a version that is not next in line.
    #[error("version {version} is out of order, expected {expected}")]
    OutOfOrder {
        /// The version requested.
        version: Version,
        /// The only version the operation may act on.
        expected: Version,
    },

    /// The rollback target is negative.
    #[error("invalid rollback target {0}")]
    InvalidTarget(Version),
}

impl MigrationError {
    /// Maps a store error raised while performing `operation`.
    pub fn from_store(operation: &'static str, source: StoreError) -> Self {
        match source {
            StoreError::Unavailable(_) => MigrationError::StoreUnavailable { operation, source },
            StoreError::Rejected(_) | StoreError::UniqueViolation(_) => {
                MigrationError::StoreRejected { operation, source }
            }
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            MigrationError::StoreRejected { .. } => ErrorKind::StoreRejected,
            MigrationError::OperationTimeout { .. } => ErrorKind::OperationTimeout,
            MigrationError::Cancelled { .. } => ErrorKind::Cancelled,
            MigrationError::LockUnavailable { .. } => ErrorKind::LockUnavailable,
            MigrationError::ApplyFailed { .. } => ErrorKind::MigrationApplyFailed,
            MigrationError::RollbackFailed { .. } => ErrorKind::MigrationRollbackFailed,
            MigrationError::LedgerCorrupt(_) => ErrorKind::LedgerCorrupt,
            MigrationError::CatalogInvalid(_) => ErrorKind::CatalogInvalid,
            MigrationError::UntrackedSchema { .. } => ErrorKind::UntrackedSchema,
            MigrationError::DuplicateVersion(_) => ErrorKind::DuplicateVersion,
            MigrationError::NotFound(_) => ErrorKind::NotFound,
            MigrationError::OutOfOrder { .. } => ErrorKind::OutOfOrder,
            MigrationError::InvalidTarget(_) => ErrorKind::InvalidTarget,
        }
    }

    /// Returns `true` when the caller may retry the whole operation later.
    ///
    /// Apply and rollback failures inherit retryability from their cause: a
    /// dropped connection is transient, a rejected script is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::ApplyFailed { cause, .. }
            | MigrationError::RollbackFailed { cause, .. } => cause.is_retryable(),
            other => other.kind().is_retryable(),
        }
    }

    /// Returns the migration version this error refers to, if any.
    pub fn version(&self) -> Option<Version> {
        match self {
            MigrationError::ApplyFailed { version, .. }
            | MigrationError::RollbackFailed { version, .. }
            | MigrationError::OutOfOrder { version, .. } => Some(*version),
            MigrationError::DuplicateVersion(version)
            | MigrationError::NotFound(version)
            | MigrationError::InvalidTarget(version) => Some(*version),
            _ => None,
        }
    }
}

/// A multi-step run that stopped at its first failure.
///
/// `completed` lists the versions that were committed before the failure,
/// in execution order. They stay committed.
#[derive(Debug, thiserror::Error)]
#[error("{error} (completed before failure: {completed:?})")]
pub struct RunError {
    /// Versions committed before the failure.
    pub completed: Vec<Version>,
    /// The failure that stopped the run.
    #[source]
    pub error: MigrationError,
}

impl RunError {
    /// Returns the classification of the underlying error.
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Returns the version that failed, if the failure was tied to one.
    pub fn failed_version(&self) -> Option<Version> {
        self.error.version()
    }

    /// Returns `true` when the caller may retry the run later.
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

impl From<MigrationError> for RunError {
    fn from(error: MigrationError) -> Self {
        RunError {
            completed: Vec::new(),
            error,
        }
    }
}
