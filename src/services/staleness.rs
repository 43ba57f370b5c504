//! Staleness classification.
//!
//! Pure functions over timestamps. `now` is always an explicit argument so
//! callers and tests control the clock.

const SECONDS_PER_DAY: i64 = 86_400;

/// Whole days elapsed between `last_activity` and `now`, never negative.
pub fn idle_days(now: i64, last_activity: i64) -> i64 {
    (now - last_activity).max(0) / SECONDS_PER_DAY
}

/// Whether an item idle since `last_activity` counts as stale under
/// `threshold_days`.
pub fn is_stale(now: i64, last_activity: i64, threshold_days: i64) -> bool {
    idle_days(now, last_activity) >= threshold_days
}
