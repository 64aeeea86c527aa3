//! Time budgets and cancellation for store calls.

use crate::error::{MigrationError, StoreError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which budget a store call is charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Budget {
    /// Reads, ledger writes, `begin`.
    Metadata,
    /// Script execution and `commit`.
    Ddl,
}

/// Bounds every store call by a timeout and the runner's cancellation token.
#[derive(Debug, Clone)]
pub(crate) struct OperationGuard {
    metadata_timeout: Duration,
    ddl_timeout: Duration,
    cancel: CancellationToken,
}

impl OperationGuard {
    pub(crate) fn new(
        metadata_timeout: Duration,
        ddl_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            metadata_timeout,
            ddl_timeout,
            cancel,
        }
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `fut`, mapping store errors, elapsed budgets and cancellation
    /// into [`MigrationError`]s tagged with `operation`.
    ///
    /// When the budget elapses or the token fires, `fut` is dropped before
    /// it completes.
    pub(crate) async fn run<T, F>(
        &self,
        operation: &'static str,
        budget: Budget,
        fut: F,
    ) -> Result<T, MigrationError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled { operation });
        }
        let timeout = match budget {
            Budget::Metadata => self.metadata_timeout,
            Budget::Ddl => self.ddl_timeout,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MigrationError::Cancelled { operation }),
            result = tokio::time::timeout(timeout, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(MigrationError::from_store(operation, source)),
                Err(_) => {
                    log::debug!("{} exceeded its {:?} budget", operation, timeout);
                    Err(MigrationError::OperationTimeout { operation, timeout })
                }
            },
        }
    }
}
