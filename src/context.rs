use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

/// Cancellation and deadline shared by every step of a transfer.
///
/// Checked at each suspension point; a cancelled or expired context turns
/// the pending step into [`BridgeError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct BridgeContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl BridgeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Applies `timeout` only if no earlier deadline is set.
    pub fn with_default_timeout(self, timeout: Option<Duration>) -> Self {
        match (self.deadline, timeout) {
            (None, Some(timeout)) => self.with_timeout(timeout),
            _ => self,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Runs `fut` unless the context is cancelled first.
    pub async fn guard<T, F>(&self, source_submitted: bool, fut: F) -> Result<T, BridgeError>
    where
        F: Future<Output = T>,
    {
        let cancelled = BridgeError::Cancelled { source_submitted };
        if self.is_cancelled() {
            return Err(cancelled);
        }
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled),
            _ = expired => Err(cancelled),
            value = fut => Ok(value),
        }
    }

    /// [`guard`](Self::guard) for fallible steps.
    pub async fn run<T, F>(&self, source_submitted: bool, fut: F) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, BridgeError>>,
    {
        self.guard(source_submitted, fut).await?
    }
}
