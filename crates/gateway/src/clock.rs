//! Wall-clock helpers shared across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds, used for analytics timestamps where
/// second granularity would collapse adjacent records.
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
