use std::time::Duration;

/// Cap on the retry backoff delay: 3,000,000 ms (~50 minutes).
const MAX_BACKOFF_MS: u64 = 3_000_000;

/// Exponential backoff between retries: `min(initial * 2^attempt, cap)`.
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    let initial_ms = initial.as_millis() as u64;
    let scaled = initial_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    Duration::from_millis(scaled.min(MAX_BACKOFF_MS))
}
