//! Bounded exponential backoff for transient backend failures

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Result, StrataError};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    /// Delay before the next attempt, or `None` when `error` should be
    /// returned. `retries` is the number of retries already made.
    pub fn should_retry(&self, retries: u32, error: &StrataError) -> Option<Duration> {
        (error.is_transient() && retries < self.max_attempts)
            .then(|| self.calculate_delay(retries + 1))
    }

    /// Run `operation`, retrying transient errors with backoff. Non-transient
    /// errors are returned immediately; the last transient error is returned
    /// once the budget is spent.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => match self.should_retry(retries, &e) {
                    Some(delay) => {
                        retries += 1;
                        tracing::debug!(
                            "{} failed ({}), retry {}/{} in {:?}",
                            op_name,
                            e,
                            retries,
                            self.max_attempts,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        if e.is_transient() {
                            tracing::warn!("{} failed after {} retries: {}", op_name, retries, e);
                        }
                        return Err(e);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(150),
            multiplier: 2.0,
        };

        assert_eq!(policy.calculate_delay(1), Duration::from_millis(50));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(150));
        assert_eq!(policy.calculate_delay(10), Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast_policy(3)
            .run("op", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StrataError::ConnectionFailure("reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_surfaces_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast_policy(2)
            .run("op", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StrataError::timeout("op", Duration::from_millis(1)))
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_errors_fail_fast() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = fast_policy(5)
            .run("op", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StrataError::AuthenticationFailure("denied".into()))
            })
            .await;

        assert!(matches!(result, Err(StrataError::AuthenticationFailure(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
