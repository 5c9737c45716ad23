use questline_core::Timestamp;

/// Port to the time source.
///
/// Every age and TTL decision in the delivery core (level-cache
/// expiry, burst gaps, backlog entry ages) reads time through this
/// seam, so tests can pin and advance it without sleeping.
pub trait Clock: Send + Sync {
    /// Current instant according to this source.
    fn now(&self) -> Timestamp;

    /// Source identifier for logs.
    fn name(&self) -> &str {
        "Clock"
    }
}
