use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::types::duration_ms;

/// Breaker thresholds shared by every key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure after which calls are let through again
    #[serde(with = "duration_ms")]
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

/// Errors that decide whether they count against the breaker.
pub trait BreakerFailure {
    fn trips_breaker(&self) -> bool;
}

/// Outcome of [`CircuitBreaker::execute`] when the call did not succeed.
#[derive(Debug)]
pub enum CircuitError<E> {
    /// Circuit was open; the operation never ran
    Open(String),
    /// Operation ran and failed
    Inner(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitError::Open(_))
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitError::Inner(error) => Some(error),
            CircuitError::Open(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct KeyState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Per-key circuit breaker.
///
/// Two states only: a key opens after `failure_threshold` consecutive
/// failures and reads as closed again once `reset_timeout` has passed since
/// the last failure. There is no half-open trial call; the first success after
/// that fully closes it, and a failure re-opens it immediately because the
/// consecutive count is still at or above the threshold.
///
/// Each key has its own lock; the outer map is only write-locked the first
/// time a key is seen.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    keys: RwLock<HashMap<String, Arc<Mutex<KeyState>>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn threshold(&self) -> u32 {
        self.config.failure_threshold.max(1)
    }

    fn existing(&self, key: &str) -> Option<Arc<Mutex<KeyState>>> {
        self.keys.read().get(key).cloned()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<KeyState>> {
        if let Some(state) = self.existing(key) {
            return state;
        }
        self.keys
            .write()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn open_now(&self, state: &KeyState) -> bool {
        if state.consecutive_failures < self.threshold() {
            return false;
        }
        match state.last_failure {
            Some(at) => at.elapsed() < self.config.reset_timeout,
            None => false,
        }
    }

    pub fn is_open(&self, key: &str) -> bool {
        match self.existing(key) {
            Some(state) => self.open_now(&state.lock()),
            None => false,
        }
    }

    pub fn state(&self, key: &str) -> BreakerState {
        if self.is_open(key) {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    pub fn consecutive_failures(&self, key: &str) -> u32 {
        self.existing(key)
            .map(|state| state.lock().consecutive_failures)
            .unwrap_or(0)
    }

    pub fn record_success(&self, key: &str) {
        let state = self.entry(key);
        let mut state = state.lock();
        if state.consecutive_failures >= self.threshold() {
            info!(key, "circuit closed");
        }
        state.consecutive_failures = 0;
    }

    pub fn record_failure(&self, key: &str) {
        let state = self.entry(key);
        let mut state = state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        if state.consecutive_failures == self.threshold() {
            warn!(
                key,
                failures = state.consecutive_failures,
                reset_timeout = ?self.config.reset_timeout,
                "circuit opened"
            );
        } else {
            debug!(key, failures = state.consecutive_failures, "failure recorded");
        }
    }

    /// Clears all state for `key`.
    pub fn reset(&self, key: &str) {
        self.keys.write().remove(key);
    }

    /// Runs `operation` unless the circuit for `key` is open, recording the
    /// outcome. Failures whose [`BreakerFailure::trips_breaker`] is false are
    /// returned without touching the breaker.
    pub async fn execute<T, E, F, Fut>(&self, key: &str, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: BreakerFailure,
    {
        if self.is_open(key) {
            debug!(key, "circuit open, skipping call");
            return Err(CircuitError::Open(key.to_string()));
        }

        match operation().await {
            Ok(value) => {
                self.record_success(key);
                Ok(value)
            }
            Err(error) => {
                if error.trips_breaker() {
                    self.record_failure(key);
                }
                Err(CircuitError::Inner(error))
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl BreakerFailure for crate::error::BridgeError {
    fn trips_breaker(&self) -> bool {
        self.kind().trips_breaker()
    }
}

impl BreakerFailure for crate::types::TransferResult {
    fn trips_breaker(&self) -> bool {
        self.error_kind().map(|kind| kind.trips_breaker()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use proptest::prelude::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn test_unknown_key_is_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open("cctp"));
        assert_eq!(cb.state("cctp"), BreakerState::Closed);
    }

    #[test]
    fn test_keys_are_independent() {
        let cb = breaker(2, Duration::from_secs(60));
        cb.record_failure("cctp");
        cb.record_failure("cctp");
        assert!(cb.is_open("cctp"));
        assert!(!cb.is_open("wormhole"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopens_after_reset_on_next_failure() {
        let cb = breaker(2, Duration::from_secs(60));
        cb.record_failure("gmp");
        cb.record_failure("gmp");
        assert!(cb.is_open("gmp"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cb.is_open("gmp"));

        cb.record_failure("gmp");
        assert!(cb.is_open("gmp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_skips_when_open() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure("cctp");

        let mut ran = false;
        let result: Result<(), CircuitError<BridgeError>> = cb
            .execute("cctp", || {
                ran = true;
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().is_open());
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_execute_ignores_wallet_rejection() {
        let cb = breaker(1, Duration::from_secs(60));
        let result: Result<(), _> = cb
            .execute("wormhole", || async { Err(BridgeError::WalletRejected("denied".into())) })
            .await;
        assert!(matches!(result, Err(CircuitError::Inner(BridgeError::WalletRejected(_)))));
        assert!(!cb.is_open("wormhole"));

        let _: Result<(), _> = cb
            .execute("wormhole", || async { Err(BridgeError::Network("down".into())) })
            .await;
        assert!(cb.is_open("wormhole"));
    }

    proptest! {
        #[test]
        fn prop_opens_at_threshold_and_success_closes(threshold in 1u32..50, extra in 0u32..10) {
            let cb = breaker(threshold, Duration::from_secs(3600));
            for _ in 0..threshold - 1 {
                cb.record_failure("k");
                prop_assert!(!cb.is_open("k"));
            }
            cb.record_failure("k");
            prop_assert!(cb.is_open("k"));
            for _ in 0..extra {
                cb.record_failure("k");
                prop_assert!(cb.is_open("k"));
            }
            cb.record_success("k");
            prop_assert!(!cb.is_open("k"));
            prop_assert_eq!(cb.consecutive_failures("k"), 0);
        }
    }
}
