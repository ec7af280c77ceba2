//! Bounded fixed-interval retry.
//!
//! Every failure is retryable by default. [`retry_when`] lets a caller stop
//! early on errors its predicate rejects; those are returned as-is rather
//! than wrapped in `RetryExhausted`.

use std::future::Future;

use relmatrix_core::{MatrixError, MatrixResult, RetryPolicy};
use tracing::{debug, warn};

/// Run `op` under `policy`, retrying every failure.
///
/// `op` receives the 1-based attempt number. On exhaustion the last error is
/// wrapped in [`MatrixError::RetryExhausted`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, op: F) -> MatrixResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = MatrixResult<T>>,
{
    retry_when(policy, operation, |_| true, op).await
}

/// Like [`retry`], but only retries errors for which `should_retry` holds.
pub async fn retry_when<T, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    should_retry: P,
    mut op: F,
) -> MatrixResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = MatrixResult<T>>,
    P: Fn(&MatrixError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !should_retry(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                return Err(MatrixError::RetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }
            Err(err) => {
                warn!(
                    operation = %operation,
                    attempt,
                    max_attempts,
                    interval_secs = policy.interval_secs,
                    error = %err,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(policy.interval()).await;
                attempt += 1;
            }
        }
    }
}
