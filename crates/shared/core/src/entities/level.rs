use serde::{Deserialize, Serialize};

use crate::entities::Credentials;
use crate::values::Timestamp;

/// A stage of the puzzle game: stable engine id plus the human-facing
/// sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub id: u32,
    pub number: u32,
}

impl Level {
    pub fn new(id: u32, number: u32) -> Self {
        Level { id, number }
    }
}

/// The most recent level a player is believed to be on, with the moment
/// it was observed. Updated after every successful delivery and after
/// any explicit state refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedLevel {
    pub level: Level,
    pub observed_at: Timestamp,
}

/// Decoded result of a level-state read.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelState {
    pub level: Level,
    pub is_passed: bool,
    pub dismissed: bool,
    /// Remaining seconds of an active answer-block window, if any.
    pub block_remaining_secs: Option<u64>,
    pub sectors_required: Option<u32>,
    pub sectors_passed: Option<u32>,
    /// New session tokens obtained by a transparent re-authentication
    /// performed while serving this read; the caller must persist them.
    pub refreshed_credentials: Option<Credentials>,
}

/// Result of a successful answer submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    /// Level the engine reports after the submission.
    pub level: Level,
    /// Engine verdict: `None` means the answer was not processed,
    /// otherwise correct/incorrect.
    pub verdict: Option<bool>,
    /// The submission completed the level.
    pub level_passed: bool,
    /// Player-facing verdict line.
    pub text: String,
    /// See [`LevelState::refreshed_credentials`].
    pub refreshed_credentials: Option<Credentials>,
}
