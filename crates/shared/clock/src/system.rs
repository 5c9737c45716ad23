use chrono::Utc;
use questline_core::Timestamp;
use questline_ports::Clock;

/// Wall-clock time, the production time source.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::thread;

    #[test]
    fn test_system_clock_tracks_wall_time() {
        let clock = SystemClock::new();
        let before = clock.now();
        thread::sleep(std::time::Duration::from_millis(10));
        let after = clock.now();

        assert!(after > before);
        assert!(after - before >= Duration::milliseconds(9));
    }
}
