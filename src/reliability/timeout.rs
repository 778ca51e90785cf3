use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::TimeoutError;

/// Races `operation` against `duration`.
///
/// On timeout the operation future is dropped, which abandons it at its next
/// await point, and a [`TimeoutError`] carrying `context` is converted into
/// the caller's error type. Errors from the operation itself pass through
/// untouched.
pub async fn with_timeout<T, E, Fut>(operation: Fut, duration: Duration, context: &str) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<TimeoutError>,
{
    match tokio::time::timeout(duration, operation).await {
        Ok(result) => result,
        Err(_) => {
            warn!(context, ?duration, "operation timed out");
            Err(TimeoutError::new(context, duration).into())
        }
    }
}
