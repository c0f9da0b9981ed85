//! Retry logic with exponential backoff

use std::time::Duration;
use anyhow::Result;
use tracing::debug;
use crate::errors::{AggregatorError, AggregatorResult};

/// Backoff schedule for connection-level checks
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following one that waited `previous`.
    /// Capped at `max_delay`, plus up to 10% jitter.
    pub fn next_delay(&self, previous: Duration) -> Duration {
        let scaled = previous.mul_f64(self.multiplier.max(1.0)).min(self.max_delay);
        scaled + scaled.mul_f64(0.1 * rand::random::<f64>())
    }
}

/// Run `operation` until it succeeds or `max_attempts` is spent.
/// The last failure is wrapped into [`AggregatorError::Network`].
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> AggregatorResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if attempt >= attempts {
            return Err(AggregatorError::Network {
                message: format!("{} failed after {} attempts", context, attempt),
                source: Some(error),
                retry_count: attempt,
            });
        }

        debug!(%context, attempt, "Retrying in {:?}: {}", delay, error);
        tokio::time::sleep(delay).await;
        delay = config.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry_with_backoff(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow::anyhow!("boom"))
                    } else {
                        Ok(42)
                    }
                }
            },
            &RetryConfig::default(),
            "flaky op",
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let result: AggregatorResult<()> = retry_with_backoff(
            || async { Err(anyhow::anyhow!("down")) },
            &RetryConfig::default(),
            "dead op",
        )
        .await;

        match result {
            Err(AggregatorError::Network { retry_count, .. }) => assert_eq!(retry_count, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let next = config.next_delay(Duration::from_millis(250));
        assert!(next >= Duration::from_millis(300));
        assert!(next <= Duration::from_millis(330));
    }
}
