//! Questline Clock Infrastructure
//!
//! Time sources behind the [`Clock`] port:
//!
//! - [`SystemClock`] — wall-clock time for production
//! - [`ManualClock`] — explicitly advanced time for deterministic tests
//!
//! Every age/TTL decision in the delivery core (level-cache expiry,
//! burst gaps, single-answer delay) reads time through an injected
//! `Arc<dyn Clock>`, so tests can pin and advance time without sleeping.

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use questline_ports::Clock;
