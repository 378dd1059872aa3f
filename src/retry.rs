//! Exponential backoff retry for model calls.
//!
//! Wraps any fallible async operation the agent loop performs against a
//! [`crate::provider::LanguageModel`], retrying only when
//! [`Error::is_retryable`] says so (`spec.md` §9: tool and permission
//! failures are never retried here).

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Backoff schedule and attempt budget.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts, including the first (1 = no retry).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Jitter ratio applied on top of the exponential delay, in `[0.0, 1.0]`.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32 - 1);
        let base = base.min(self.max_backoff.as_secs_f64());
        let jitter = base * self.jitter_ratio * rand::thread_rng().r#gen::<f64>();
        Duration::from_secs_f64(base + jitter)
    }
}

/// Runs `operation` up to `config.max_attempts` times, sleeping between
/// attempts per the exponential backoff schedule. Stops immediately on a
/// non-retryable error, on `HookAbort`, or once attempts are exhausted.
pub async fn retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= config.max_attempts {
                    return Err(err);
                }
                let delay = config.delay_for_attempt(attempt);
                log::warn!(
                    "retrying after {:?} (attempt {}/{}): {}",
                    delay,
                    attempt,
                    config.max_attempts,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicU32::new(0);
        let result = retry(&RetryConfig::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(42)
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default()
            .with_max_attempts(5)
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(5));
        let result = retry(&config, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::model("transient"))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry(&RetryConfig::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(Error::tool("bad input"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(1))
            .with_max_backoff(Duration::from_millis(2));
        let err = retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(Error::model("still failing"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn no_retry_config_allows_exactly_one_attempt() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
