use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::types::duration_ms;

/// Backoff parameters for [`poll_with_backoff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Total time budget across all checks
    #[serde(with = "duration_ms")]
    pub max_wait: Duration,
    /// Minimum sleep between checks
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(600),
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollPolicy {
    pub fn new(max_wait: Duration, initial_delay: Duration) -> Self {
        Self {
            max_wait,
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

    fn next_delay(&self, current: Duration) -> Duration {
        let cap = self.max_delay.max(self.initial_delay);
        let grown = current.as_secs_f64() * self.backoff_multiplier.max(1.0);
        if !grown.is_finite() || grown >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(grown).max(self.initial_delay)
        }
    }
}

/// Calls `check` until it yields a value or `policy.max_wait` elapses.
///
/// `check` returns `None` for "not ready yet". Between checks the poller
/// sleeps at least `initial_delay`, growing by `backoff_multiplier` up to
/// `max_delay`. No check is issued once the budget is spent; `None` is
/// returned instead.
pub async fn poll_with_backoff<T, F, Fut>(policy: &PollPolicy, mut check: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_delay;
    let mut tick = 0;

    loop {
        tick += 1;
        if let Some(value) = check(tick).await {
            return Some(value);
        }

        if started.elapsed() + delay > policy.max_wait {
            trace!(tick, waited = ?started.elapsed(), "poll budget exhausted");
            return None;
        }

        trace!(tick, ?delay, "not ready, sleeping");
        sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}
