//! Current vs obsolete classification of delivered alerts.
//!
//! Backends deliver up to about a second early (fire times are truncated to
//! whole seconds) and the caller's clock drifts relative to the scheduling
//! moment, so the start bound is widened by a tolerance. The end bound is
//! inclusive and not widened.

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::TimeSpan;

pub fn is_current(span: &TimeSpan, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
    // A widened start below the representable range bounds nothing.
    let started = span
        .start()
        .checked_sub_signed(tolerance)
        .map_or(true, |earliest| earliest <= now);
    started && now <= span.end()
}

/// Classify a raw identifier; identifiers that do not decode are never current.
pub fn identifier_is_current(identifier: &str, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
    TimeSpan::decode(identifier)
        .map(|span| is_current(&span, now, tolerance))
        .unwrap_or(false)
}
