//! Bounded retry with exponential backoff.
//!
//! This is the retry-on-error primitive: it re-invokes an operation that
//! keeps failing. It is distinct from the controller's confirmation poll,
//! which repeats a *successful* read until a state becomes visible.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Invoke `op` up to `max_attempts` times, sleeping `base_delay * 2^i` after
/// the i-th failure (0-based). The last observed error is propagated once the
/// budget is spent.
pub async fn with_backoff<T, E, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts.max(1) {
                    return Err(err);
                }
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
