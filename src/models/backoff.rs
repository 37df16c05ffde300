//! Retry delay schedule.

use std::time::Duration;

/// Returns the delay before retry number `retry_count`.
///
/// The schedule is deterministic exponential backoff: `2^retry_count`
/// minutes, so 1, 2, 4, 8, ... minutes. Negative inputs behave like zero and
/// the exponent saturates well below the point where the shift would
/// overflow.
#[must_use]
pub fn retry_backoff(retry_count: i32) -> Duration {
    #[allow(clippy::cast_sign_loss)]
    let exponent = retry_count.clamp(0, 40) as u32;
    let minutes = 1u64 << exponent;
    Duration::from_secs(minutes.saturating_mul(60))
}
