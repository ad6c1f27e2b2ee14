use std::time::Duration;

use tracing::{debug, warn};

/// Poll `ready` until it returns true or `max_attempts` checks have failed.
///
/// Checks run `interval` apart; returns whether any check succeeded. Past the
/// budget the caller is expected to stay inert.
pub async fn retry_until<F>(max_attempts: u32, interval: Duration, mut ready: F) -> bool
where
    F: FnMut() -> bool,
{
    for attempt in 1..=max_attempts {
        if ready() {
            debug!("Bootstrap check succeeded on attempt {attempt}");
            return true;
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    warn!("Bootstrap gave up after {max_attempts} attempt(s)");
    false
}
