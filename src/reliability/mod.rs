//! Timeouts, retries, polling and circuit breaking for every network-facing
//! call the adapters make.
//!
//! Wrapped operations keep their own error type: the kit only adds
//! [`TimeoutError`] and [`RetryExhaustedError`], both of which carry the
//! context needed to diagnose what was abandoned.

pub mod circuit_breaker;
pub mod poll;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{BreakerConfig, BreakerFailure, BreakerState, CircuitBreaker, CircuitError};
pub use poll::{poll_with_backoff, PollPolicy};
pub use retry::{with_retry, RetryPolicy};
pub use timeout::with_timeout;

use std::time::Duration;

/// Errors that know whether running the operation again could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// An operation did not finish before its deadline.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{context} timed out after {after:?}")]
pub struct TimeoutError {
    pub context: String,
    pub after: Duration,
}

impl TimeoutError {
    pub fn new(context: impl Into<String>, after: Duration) -> Self {
        Self {
            context: context.into(),
            after,
        }
    }
}

/// Every attempt failed; `last` is the final underlying error.
#[derive(thiserror::Error, Debug)]
#[error("{operation} failed after {attempts} attempts: {last}")]
pub struct RetryExhaustedError<E>
where
    E: std::error::Error + 'static,
{
    pub operation: String,
    pub attempts: u32,
    #[source]
    pub last: E,
}
