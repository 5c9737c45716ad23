use chrono::{DateTime, Utc};

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Identifier of a message previously sent through the chat transport,
/// used to edit a progress message in place instead of flooding the chat.
pub type MessageId = i64;
