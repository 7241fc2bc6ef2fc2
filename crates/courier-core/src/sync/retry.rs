//! Bounded retry for single-row storage operations.

use std::future::Future;

use crate::db::StorageFault;
use crate::error::StorageError;

/// Total attempts for a single-row operation, the first one included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Retry transient faults immediately, fail permanent ones on first sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Values below one are raised to one.
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// An exhausted budget surfaces as [`StorageError::ConcurrentModification`].
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageFault>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::debug!(
                            operation,
                            attempts,
                            "storage operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(fault) if fault.is_transient() && attempts < self.max_attempts => {
                    tracing::warn!(
                        operation,
                        attempt = attempts,
                        %fault,
                        "transient storage fault, retrying"
                    );
                }
                Err(fault) if fault.is_transient() => {
                    tracing::error!(operation, attempts, %fault, "storage still busy, giving up");
                    return Err(StorageError::ConcurrentModification);
                }
                Err(fault) => {
                    tracing::error!(operation, %fault, "permanent storage fault");
                    return Err(fault.into());
                }
            }
        }
    }
}

/// Surface a fault from an operation that is never retried.
///
/// Lock contention becomes `transient`; permanent faults keep their kind.
pub fn without_retry(
    operation: &str,
    fault: StorageFault,
    transient: StorageError,
) -> StorageError {
    if fault.is_transient() {
        tracing::warn!(operation, %fault, "storage busy, not retrying multi-row operation");
        transient
    } else {
        tracing::error!(operation, %fault, "permanent storage fault");
        fault.into()
    }
}
