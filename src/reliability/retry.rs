use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::timeout::with_timeout;
use super::{RetryExhaustedError, Retryable, TimeoutError};
use crate::types::{duration_ms, option_duration_ms};

/// Exponential backoff parameters for [`with_retry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Deadline applied to each individual attempt
    #[serde(with = "option_duration_ms", default)]
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            per_attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    /// Delay slept after the `failed_attempt`-th failure (1-based).
    ///
    /// Grows by `backoff_multiplier` per attempt and never exceeds `max_delay`.
    /// Multipliers below 1 are treated as 1 so the sequence never shrinks.
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.initial_delay);
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        if exponent == 0 {
            return self.initial_delay;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(secs).max(self.initial_delay)
        }
    }

    /// The full sequence of sleeps between attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1)).map(|n| self.delay_for_attempt(n)).collect()
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is reached.
///
/// `op` receives the 1-based attempt number. `on_attempt` is called with the
/// attempt number and error after every failed attempt. Non-retryable errors
/// are returned unchanged; exhaustion wraps the last error in
/// [`RetryExhaustedError`].
pub async fn with_retry<T, E, F, Fut, A>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
    mut on_attempt: A,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    A: FnMut(u32, &E),
    E: Retryable + From<TimeoutError> + From<RetryExhaustedError<E>> + std::error::Error + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match policy.per_attempt_timeout {
            Some(limit) => with_timeout(op(attempt), limit, operation).await,
            None => op(attempt).await,
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                on_attempt(attempt, &error);

                if !error.is_retryable() {
                    return Err(error);
                }
                if attempt >= max_attempts {
                    return Err(RetryExhaustedError {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: error,
                    }
                    .into());
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(operation, attempt, ?delay, %error, "attempt failed, backing off");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(400))
            .with_attempt_timeout(None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut seen = Vec::new();
        let counter = calls.clone();

        let result = with_retry(
            "get_confirmation",
            &fast_policy(5),
            move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BridgeError::Network("503".into()))
                    } else {
                        Ok(7u64)
                    }
                }
            },
            |attempt, _| seen.push(attempt),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let err = with_retry(
            "get_block_data",
            &fast_policy(3),
            |attempt| async move { Err::<(), _>(BridgeError::Network(format!("failure {attempt}"))) },
            |_, _| {},
        )
        .await
        .unwrap_err();

        match err {
            BridgeError::RetryExhausted(inner) => {
                assert_eq!(inner.attempts, 3);
                assert_eq!(inner.operation, "get_block_data");
                assert!(inner.last.to_string().contains("failure 3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let err = with_retry(
            "sign",
            &fast_policy(5),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(BridgeError::WalletRejected("user said no".into())) }
            },
            |_, _| {},
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BridgeError::WalletRejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = fast_policy(3).with_attempt_timeout(Some(Duration::from_secs(1)));

        let value = with_retry(
            "slow_rpc",
            &policy,
            move |_| {
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, BridgeError>("done")
                }
            },
            |_, err| assert_eq!(err.kind(), crate::error::ErrorKind::Timeout),
        )
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_schedule_caps_at_max_delay() {
        let policy = fast_policy(6);
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(400),
                Duration::from_millis(400),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_delays_non_decreasing_and_capped(
            initial_ms in 1u64..5_000,
            max_ms in 1u64..120_000,
            multiplier in 1.0001f64..10.0,
            attempts in 1u32..40,
        ) {
            let policy = RetryPolicy::new(attempts, Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(max_ms))
                .with_multiplier(multiplier);
            let cap = policy.max_delay.max(policy.initial_delay);
            let schedule = policy.schedule();
            for pair in schedule.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for delay in schedule {
                prop_assert!(delay <= cap);
                prop_assert!(delay >= policy.initial_delay.min(cap));
            }
        }
    }
}
