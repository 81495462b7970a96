//! Retry with exponential backoff for transient provider failures.
//!
//! Only errors the provider marks as transient (or rate-limited) are
//! retried; validation, permission and not-found errors surface
//! immediately. Rate-limited errors honor the provider's suggested delay
//! as the backoff base.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{CairnError, ExecError, Result};

/// Default number of attempts per provider call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Runs an async operation, retrying transient failures with exponential
/// backoff.
///
/// # Errors
///
/// Returns `ExecError::MaxRetriesExceeded` once a transient failure has
/// exhausted `max_attempts`, or the original error if it is not retryable.
pub async fn with_backoff<T, F, Fut>(resource: &str, max_attempts: u32, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let base = err.retry_delay_secs().unwrap_or(2);
                let delay = base.saturating_mul(1 << (attempt - 1).min(6));
                warn!(
                    "Transient failure for {} (attempt {}/{}), retrying in {}s: {}",
                    resource, attempt, max_attempts, delay, err
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            }
            Err(err) if err.is_retryable() => {
                warn!("Giving up on {} after {} attempts: {}", resource, attempt, err);
                return Err(CairnError::Exec(ExecError::MaxRetriesExceeded {
                    attempts: max_attempts,
                    resource: resource.to_string(),
                }));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff("res", 4, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CairnError::Provider(ProviderError::transient("flaky")))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_report_attempts() {
        let result: Result<u32> = with_backoff("res", 3, || async {
            Err(CairnError::Provider(ProviderError::transient("flaky")))
        })
        .await;
        match result {
            Err(CairnError::Exec(ExecError::MaxRetriesExceeded { attempts, resource })) => {
                assert_eq!(attempts, 3);
                assert_eq!(resource, "res");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = with_backoff("res", 4, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CairnError::Provider(ProviderError::validation("bad input"))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
