//! Bounded retry policy for provider calls.
//!
//! The policy is plain data: an ordered list of delays. Attempt `n` (0-based)
//! that fails with a transient error sleeps `delays[n]` and tries again; once
//! the list is used up the last error is returned to the caller.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use super::errors::InferenceError;

/// Backoff schedule used when no configuration overrides it: 1s, 2s, 4s.
pub const DEFAULT_RETRY_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];

/// Ordered backoff delays applied to transient provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_delays_ms", rename = "delays_ms")]
    delays_ms: Vec<u64>,
}

fn default_delays_ms() -> Vec<u64> {
    DEFAULT_RETRY_DELAYS_MS.to_vec()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delays_ms: default_delays_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn from_delays(delays: &[Duration]) -> Self {
        Self {
            delays_ms: delays.iter().map(|d| d.as_millis() as u64).collect(),
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self { delays_ms: Vec::new() }
    }

    /// Total number of attempts, the first one included.
    pub fn max_attempts(&self) -> usize {
        self.delays_ms.len() + 1
    }

    /// Delay before retry number `retry` (0-based), if the budget allows one.
    pub fn delay_for(&self, retry: usize) -> Option<Duration> {
        self.delays_ms.get(retry).map(|ms| Duration::from_millis(*ms))
    }

    /// Run `op` until it succeeds, fails fatally, or the schedule runs out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, InferenceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InferenceError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if retry > 0 {
                        tracing::info!(operation, attempts = retry + 1, "provider call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => match self.delay_for(retry) {
                    Some(delay) => {
                        tracing::warn!(
                            operation,
                            error = %e,
                            attempt = retry + 1,
                            max_attempts = self.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            "transient provider failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        retry += 1;
                    }
                    None => {
                        tracing::error!(
                            operation,
                            error = %e,
                            attempts = retry + 1,
                            "provider retries exhausted"
                        );
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::from_delays(&[Duration::from_millis(1); 3])
    }

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(0), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(3), None);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(InferenceError::RateLimited { retry_after_secs: None })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_schedule_surfaces_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InferenceError::Timeout { duration_secs: 1 }) }
            })
            .await;
        assert!(matches!(result, Err(InferenceError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_provider_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(InferenceError::ProviderError {
                        status: Some(400),
                        reason: "malformed".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(InferenceError::ProviderError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::none()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InferenceError::RateLimited { retry_after_secs: None }) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let policy: RetryPolicy = serde_yaml::from_str("delays_ms: [10, 20]").unwrap();
        assert_eq!(policy.max_attempts(), 3);
        let policy: RetryPolicy = serde_yaml::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::default());
    }
}
