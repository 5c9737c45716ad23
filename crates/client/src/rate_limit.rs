//! Per-domain request pacing.
//!
//! The game engine bans clients that hammer it, so requests against a
//! single domain are serialized with a minimum gap between the *starts*
//! of consecutive requests, regardless of which player issued them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep_until};

/// Minimum gap between the starts of consecutive requests to one domain.
pub const MIN_REQUEST_GAP: Duration = Duration::from_millis(1200);

/// Process-wide rate-limit ledger, keyed by domain.
///
/// The per-domain slot records the start instant of the most recent
/// request. tokio's mutex queues waiters in FIFO order, so concurrent
/// callers form the serialization chain the protocol requires; once no
/// waiter is left the slot holds only the last start instant, so an
/// idle domain carries no chain at all.
pub struct RateLimiter {
    min_gap: Duration,
    domains: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_gap(MIN_REQUEST_GAP)
    }

    pub fn with_gap(min_gap: Duration) -> Self {
        RateLimiter {
            min_gap,
            domains: DashMap::new(),
        }
    }

    /// Waits until this caller may start a request against `domain`,
    /// then records the start. Returns only when it is this caller's
    /// turn; callers issue their request immediately after.
    pub async fn acquire(&self, domain: &str) {
        let slot = self
            .domains
            .entry(domain.to_string())
            .or_default()
            .clone();

        let mut last_start = slot.lock().await;
        let now = Instant::now();
        match *last_start {
            Some(previous) => {
                let earliest = previous + self.min_gap;
                if earliest > now {
                    sleep_until(earliest).await;
                    *last_start = Some(earliest);
                } else {
                    *last_start = Some(now);
                }
            }
            None => *last_start = Some(now),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
