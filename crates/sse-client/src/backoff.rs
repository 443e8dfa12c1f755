//! Reconnect backoff
//!
//! After `n` continuous errors the next attempt waits a random number of
//! milliseconds in `[n³, (n+1)³]`, capped at one minute. The first error
//! reconnects immediately.

use std::time::Duration;

use rand::Rng;

/// Upper bound on a single backoff sleep
pub const MAX_BACKOFF_MS: u64 = 60 * 1000;

/// Inclusive millisecond window for the given error count, before capping
pub fn backoff_window(continuous_errors: u32) -> Option<(u64, u64)> {
    if continuous_errors <= 1 {
        return None;
    }
    let n = u64::from(continuous_errors);
    let min = n.saturating_pow(3);
    let max = (n + 1).saturating_pow(3);
    Some((min, max))
}

/// Pick the delay before the next reconnect attempt
pub fn backoff_delay(continuous_errors: u32) -> Duration {
    match backoff_window(continuous_errors) {
        None => Duration::ZERO,
        Some((min, _)) if min >= MAX_BACKOFF_MS => Duration::from_millis(MAX_BACKOFF_MS),
        Some((min, max)) => {
            let ms = rand::thread_rng().gen_range(min..=max);
            Duration::from_millis(ms.min(MAX_BACKOFF_MS))
        }
    }
}
