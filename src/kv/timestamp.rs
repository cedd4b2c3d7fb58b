//! Coarse KV timestamps for expiry bucketing.
//!
//! Entries store `normalize(microseconds)` (whole seconds), so TTL checks
//! are a single integer comparison. Only non-negative inputs are defined.

use std::time::{SystemTime, UNIX_EPOCH};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Microseconds in, seconds-granularity bucket out. Truncates toward zero.
#[inline]
pub fn normalize(microseconds: i64) -> i64 {
    microseconds / MICROS_PER_SECOND
}

/// Inverse scale of [`normalize`] (start of the bucket).
#[inline]
pub fn to_microseconds(seconds: i64) -> i64 {
    seconds.saturating_mul(MICROS_PER_SECOND)
}

/// True when an entry written at `entry_secs` has outlived `ttl_secs` at
/// wall-clock `now_us`.
#[inline]
pub fn is_expired(entry_secs: i64, ttl_secs: i64, now_us: i64) -> bool {
    entry_secs.saturating_add(ttl_secs) < normalize(now_us)
}

/// Current wall-clock time in microseconds since the epoch.
pub fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

// ── Tests ──────────────────────────────────────────────────────────
