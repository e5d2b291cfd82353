//! Timestamp utilities

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert fractional seconds to a duration, clamping negatives and NaN to zero
pub fn secs_f64_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// Unix timestamp (seconds) `ttl` from now
pub fn expiry_from_now(ttl: Duration) -> i64 {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now().checked_add_signed(ttl))
        .map(|at| at.timestamp())
        .unwrap_or(i64::MAX)
}
