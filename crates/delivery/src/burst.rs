//! Burst detection.
//!
//! A "burst" is a short run of answers arriving in rapid succession,
//! inferred to be a backlog typed while offline and now pasted in, as
//! opposed to live play. Only the tail of the sequence matters, so
//! detection reacts within three inputs of a true burst starting.

use chrono::Duration;

use questline_core::Timestamp;

/// Maximum span of the examined tail for it to count as a burst.
pub const BURST_WINDOW_MS: i64 = 10_000;

/// Maximum gap between consecutive entries within a burst.
pub const BURST_MAX_GAP_MS: i64 = 2_500;

/// How many trailing entries are examined.
pub const BURST_SAMPLE: usize = 3;

/// Pure classification of an ascending timestamp sequence: burst iff
/// the last [`BURST_SAMPLE`] entries span at most [`BURST_WINDOW_MS`]
/// and no consecutive gap among them exceeds [`BURST_MAX_GAP_MS`].
/// Fewer entries never trigger.
pub fn is_burst(timestamps: &[Timestamp]) -> bool {
    if timestamps.len() < BURST_SAMPLE {
        return false;
    }
    let tail = &timestamps[timestamps.len() - BURST_SAMPLE..];

    let span = tail[BURST_SAMPLE - 1] - tail[0];
    if span > Duration::milliseconds(BURST_WINDOW_MS) {
        return false;
    }

    tail.windows(2)
        .all(|pair| pair[1] - pair[0] <= Duration::milliseconds(BURST_MAX_GAP_MS))
}
