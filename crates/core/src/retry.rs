//! Retry with quadratic backoff
//!
//! Only transport-class failures are retried (see `Error::is_retryable`).
//! Attempt `i` (0-indexed) waits `i * i` backoff units before running, so the
//! first attempt runs immediately. Exhausting the attempt budget surfaces the
//! last error wrapped in `TransferFailed`.

use std::time::Duration;

use crate::error::{Error, Result};

/// Retry policy for transfers.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum total attempts, including the first.
    pub max_attempts: u32,
    /// Duration of one backoff unit. One second in production; tests shrink
    /// it to keep the quadratic schedule fast.
    pub backoff_unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }
}

/// Run `operation` until it succeeds, fails non-transiently, or the attempt
/// budget is exhausted.
pub async fn retry_transport<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let backoff = config.backoff_unit * (attempt * attempt);
            tracing::debug!(
                attempt = attempt,
                backoff_ms = backoff.as_millis() as u64,
                "retrying after transient transport error"
            );
            tokio::time::sleep(backoff).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                tracing::warn!(error = %e, attempt = attempt, "transient transport error");
            }
            Err(e) if e.is_retryable() => {
                return Err(Error::TransferFailed {
                    attempts: max_attempts,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("retry loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff_unit: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_transport(&fast_config(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transport_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_transport(&fast_config(4), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Dns("lookup failed".to_string()))
                } else {
                    Ok(1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_becomes_transfer_failed() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = retry_transport(&fast_config(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Network {
                    op: crate::error::NetworkOp::Dial,
                    message: "connection refused".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            Error::TransferFailed { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(source.is_retryable());
            }
            other => panic!("expected TransferFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<()> = retry_transport(&fast_config(5), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Integrity {
                    expected: "aa".to_string(),
                    computed: "bb".to_string(),
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.unwrap_err(), Error::Integrity { .. }));
    }
}
