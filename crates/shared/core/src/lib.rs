//! Questline Core Domain
//!
//! Pure domain types for the answer-delivery system.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod entities;
pub mod error;
pub mod values;

// Re-export commonly used types at crate root
pub use entities::{
    // Answer delivery records
    BacklogEntry,
    // Session
    Credentials,
    // Identity
    GameRef,
    // Game state
    Level,
    LevelState,
    ObservedLevel,
    PendingAnswer,
    Platform,
    PlayerDeliveryState,
    PlayerKey,
    QueueConflict,
    SingleAnswerConflict,
    SubmitOutcome,
    normalize_login,
};
pub use error::{Context, Error, ProtocolFamily, Result};
pub use values::{MessageId, Timestamp};
