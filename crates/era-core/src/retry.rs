use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry a fallible async operation with exponential backoff.
///
/// - `max_attempts`: total attempts including the first.
/// - `base_delay`: delay after the first failure, doubled each subsequent failure.
/// - `label`: description for log messages.
///
/// Used by the session/setup extract paths: object-store writes during
/// extract are retried a bounded number of times but never fail the run
/// outright.
pub async fn retry<F, Fut, T, E>(max_attempts: u32, base_delay: Duration, label: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = base_delay;
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if attempt < max_attempts {
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "{} failed, retrying",
                        label,
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}
