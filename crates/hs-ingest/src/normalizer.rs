//! Device timestamp repair.
//!
//! Field devices stamp alerts with whatever their clock says. Some firmware
//! writes epoch **seconds**, some has drifted clocks. This module applies a
//! fixed heuristic:
//!
//! | raw value                               | result          |
//! |-----------------------------------------|-----------------|
//! | `>= EPOCH_2020_MS`                      | unchanged       |
//! | `< SECONDS_VS_MILLIS_THRESHOLD`         | `raw * 1000`    |
//! | anything else                           | `now`           |
//!
//! The heuristic is lossy: a genuine millisecond value before 2020 that is
//! also below the seconds threshold is read as seconds, and a value between
//! the two bounds is discarded in favour of the caller's clock. It never
//! fails.

/// 2020-01-01T00:00:00Z in epoch milliseconds.
pub const EPOCH_2020_MS: i64 = 1_577_836_800_000;

/// Values below this are plausibly epoch seconds (≈ 2033-05-18 in seconds).
pub const SECONDS_VS_MILLIS_THRESHOLD: i64 = 2_000_000_000;

/// Which branch of the heuristic applies to a raw timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampClass {
    /// Plausible millisecond value; kept as is.
    Plausible,
    /// Read as epoch seconds and scaled to milliseconds.
    SecondsToMillis,
    /// Implausible by either reading; replaced with `now`.
    Replaced,
}

/// Classify `raw_millis` without transforming it.
pub fn classify_timestamp(raw_millis: i64) -> TimestampClass {
    if raw_millis >= EPOCH_2020_MS {
        TimestampClass::Plausible
    } else if raw_millis < SECONDS_VS_MILLIS_THRESHOLD {
        TimestampClass::SecondsToMillis
    } else {
        TimestampClass::Replaced
    }
}

/// Repair a device timestamp. See the module table for the rules.
///
/// Negative inputs fall into the seconds branch; the multiplication
/// saturates rather than overflowing.
pub fn normalize_timestamp(raw_millis: i64, now: i64) -> i64 {
    match classify_timestamp(raw_millis) {
        TimestampClass::Plausible => raw_millis,
        TimestampClass::SecondsToMillis => raw_millis.saturating_mul(1000),
        TimestampClass::Replaced => now,
    }
}
