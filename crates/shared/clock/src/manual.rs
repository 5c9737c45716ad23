use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use questline_core::Timestamp;
use questline_ports::Clock;

/// Manually advanced clock for deterministic tests.
///
/// Starts at a fixed epoch; time only moves when a test calls
/// [`ManualClock::advance`] or [`ManualClock::set`].
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new() -> Self {
        // Arbitrary fixed starting point; tests reason in deltas.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn starting_at(start: Timestamp) -> Self {
        ManualClock {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(Duration::milliseconds(millis));
    }

    pub fn set(&self, instant: Timestamp) {
        *self.now.lock() = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }

    fn name(&self) -> &str {
        "ManualClock"
    }
}
