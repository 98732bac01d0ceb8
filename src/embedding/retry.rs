//! Bounded retries with exponential backoff for provider calls.
//!
//! Only [`EmbeddingError::Unavailable`] is retried; a rejection or a malformed
//! response will not change on a second attempt.

use crate::error::EmbeddingError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Serde helpers for `Duration` as integer milliseconds.
pub(crate) mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(with = "serde_millis")]
    pub base_delay: Duration,
    /// Upper bound for any single delay, in milliseconds.
    #[serde(with = "serde_millis")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Spread each delay by ±25%.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self::default().with_max_retries(0)
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based; 0 means no delay).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        let delay_ms = exponential.min(self.max_delay.as_millis() as f64) as u64;

        if self.jitter {
            let jitter_range = delay_ms / 4;
            if jitter_range > 0 {
                let jitter = fastrand::u64(0..jitter_range * 2);
                return Duration::from_millis(delay_ms.saturating_sub(jitter_range) + jitter);
            }
        }
        Duration::from_millis(delay_ms)
    }
}

/// Whether another attempt could succeed.
pub fn is_retryable(error: &EmbeddingError) -> bool {
    matches!(error, EmbeddingError::Unavailable(_))
}

#[derive(Debug)]
pub struct RetryResult<T> {
    pub result: Result<T, EmbeddingError>,
    /// Attempts made (1 = first try decided the outcome).
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T> RetryResult<T> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, EmbeddingError> {
        self.result
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent. The closure receives the 0-based attempt.
pub async fn execute_with_retry_async<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EmbeddingError>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                };
            }
            Err(err) if is_retryable(&err) && attempt < config.max_retries => {
                let delay = config.calculate_delay(attempt + 1);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "provider_retry");
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => {
                return RetryResult {
                    result: Err(err),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[test]
    fn delay_grows_exponentially() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter(false);

        assert_eq!(config.calculate_delay(0), Duration::ZERO);
        assert_eq!(config.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped_and_jitter_stays_in_range() {
        let config = RetryConfig::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_millis(400))
            .with_backoff_multiplier(10.0);
        for attempt in 1..5 {
            let delay = config.calculate_delay(attempt);
            assert!(delay >= Duration::from_millis(300), "{delay:?}");
            assert!(delay < Duration::from_millis(500), "{delay:?}");
        }
    }

    #[test]
    fn deserializes_millis() {
        let config: RetryConfig =
            serde_yaml::from_str("max_retries: 1\nbase_delay: 250\n").unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retries_unavailable_until_success() {
        let calls = AtomicU32::new(0);
        let result = execute_with_retry_async(&fast().with_max_retries(3), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EmbeddingError::Unavailable("503".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert!(result.succeeded());
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: RetryResult<()> = execute_with_retry_async(&fast(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EmbeddingError::Rejected("400".into())) }
        })
        .await;

        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result.into_result(), Err(EmbeddingError::Rejected(_))));
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let result: RetryResult<()> = execute_with_retry_async(&fast().with_max_retries(2), |_| async {
            Err(EmbeddingError::Unavailable("timeout".into()))
        })
        .await;

        assert!(!result.succeeded());
        assert_eq!(result.attempts, 3);
    }
}
