//! Classification of sqlx errors into store errors.

use strata_core::StoreError;

/// Maps a sqlx error to a [`StoreError`] at the point of origin.
///
/// Transport failures, exhausted pools and the SQLSTATEs PostgreSQL uses for
/// lost connections, cancelled statements and resource exhaustion are
/// [`StoreError::Unavailable`]. Everything else the server refused is
/// [`StoreError::Rejected`].
pub(crate) fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(Box::new(err)),
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(db.message().to_string());
            }
            let transient = db.code().is_some_and(|code| is_transient_sqlstate(&code));
            if transient {
                StoreError::Unavailable(Box::new(err))
            } else {
                StoreError::Rejected(Box::new(err))
            }
        }
        _ => StoreError::Rejected(Box::new(err)),
    }
}

/// Class 08 (connection exception), class 53 (insufficient resources),
/// `query_canceled` (raised when `statement_timeout` fires) and the shutdown
/// codes of class 57.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("53")
        || matches!(code, "57014" | "57P01" | "57P02" | "57P03")
}
