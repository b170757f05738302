//! Exponential backoff for REST fetches.

use std::future::Future;
use std::time::Duration;

use super::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): base, 2x base, 4x base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Sum of every delay a fully failing chain waits through.
    pub fn total_delay(&self) -> Duration {
        (0..self.max_retries).map(|r| self.delay_for(r)).sum()
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the policy is
/// exhausted. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    endpoint: &str,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if retry >= policy.max_retries => {
                tracing::warn!(
                    endpoint = %endpoint,
                    attempts = retry + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for(retry);
                tracing::warn!(
                    endpoint = %endpoint,
                    retry = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn network_error() -> TransportError {
        TransportError::Network {
            endpoint: "http://127.0.0.1:1/spans".into(),
            detail: "connection refused".into(),
        }
    }

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.total_delay(), Duration::from_millis(7000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(u64::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_waits_seven_seconds_over_four_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = attempts.clone();
        let result: Result<(), _> = retry_with_backoff(RetryPolicy::default(), "spans", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(network_error()) }
        })
        .await;

        assert!(matches!(result, Err(TransportError::Network { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = retry_with_backoff(RetryPolicy::default(), "spans", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(network_error())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let counter = attempts.clone();
        let result: Result<(), _> = retry_with_backoff(RetryPolicy::default(), "spans", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TransportError::Malformed {
                    endpoint: "spans".into(),
                    detail: "not an array".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
