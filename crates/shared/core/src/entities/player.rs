use serde::{Deserialize, Serialize};

use crate::entities::{Credentials, GameRef, Level, ObservedLevel, Platform, PlayerKey};
use crate::values::Timestamp;

/// One answer waiting in the durable backlog after a connectivity
/// failure. Survives process restarts via the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub answer: String,
    pub enqueued_at: Timestamp,
    /// Level the answer was aimed at when it was enqueued, when known.
    pub level: Option<Level>,
    pub failed_attempts: u32,
    pub last_error: Option<String>,
}

impl BacklogEntry {
    pub fn new(answer: impl Into<String>, enqueued_at: Timestamp, level: Option<Level>) -> Self {
        BacklogEntry {
            answer: answer.into(),
            enqueued_at,
            level,
            failed_attempts: 0,
            last_error: None,
        }
    }
}

/// One answer held in the accumulation buffer (or awaiting burst
/// classification) before the player decides what to do with the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAnswer {
    pub answer: String,
    pub captured_at: Timestamp,
    pub level: Option<Level>,
}

/// A replay of the backlog found the live level different from the one
/// the head item remembers. Blocks deliveries until the player resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConflict {
    pub old_level_number: u32,
    pub new_level_number: u32,
    pub queue_size: usize,
}

/// A single interactive answer hit a level change between the pre-send
/// check and the write. Blocks deliveries until resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleAnswerConflict {
    pub answer: String,
    pub old_level: Level,
    pub new_level: Level,
}

/// Per-player delivery state, owned by the persistence collaborator and
/// mutated by every core component.
///
/// Transient guard flags (drain state, queue-processing guard, auth
/// in-flight) deliberately do NOT live here: they belong to the
/// in-process components that own them, which makes "reset on restart"
/// structural instead of a cleanup chore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDeliveryState {
    pub platform: Platform,
    pub user_id: i64,
    pub login: String,
    pub password: Option<String>,
    pub game: GameRef,
    /// `None` means "must authenticate"; replaced wholesale on login.
    pub credentials: Option<Credentials>,
    pub last_known_level: Option<ObservedLevel>,
    pub answer_backlog: Vec<BacklogEntry>,
    pub accumulation_buffer: Vec<PendingAnswer>,
    /// Level snapshot taken when accumulation mode began.
    pub accumulation_anchor: Option<Level>,
    pub accumulation_active: bool,
    queue_conflict: Option<QueueConflict>,
    single_conflict: Option<SingleAnswerConflict>,
}

impl PlayerDeliveryState {
    pub fn new(
        platform: Platform,
        user_id: i64,
        login: impl Into<String>,
        game: GameRef,
    ) -> Self {
        PlayerDeliveryState {
            platform,
            user_id,
            login: login.into(),
            password: None,
            game,
            credentials: None,
            last_known_level: None,
            answer_backlog: Vec::new(),
            accumulation_buffer: Vec::new(),
            accumulation_anchor: None,
            accumulation_active: false,
            queue_conflict: None,
            single_conflict: None,
        }
    }

    pub fn key(&self) -> PlayerKey {
        PlayerKey::new(self.platform.clone(), self.user_id)
    }

    pub fn queue_conflict(&self) -> Option<&QueueConflict> {
        self.queue_conflict.as_ref()
    }

    pub fn single_conflict(&self) -> Option<&SingleAnswerConflict> {
        self.single_conflict.as_ref()
    }

    /// At most one of the two conflict markers may be set at a time;
    /// setting one clears the other.
    pub fn set_queue_conflict(&mut self, conflict: QueueConflict) {
        self.single_conflict = None;
        self.queue_conflict = Some(conflict);
    }

    pub fn set_single_conflict(&mut self, conflict: SingleAnswerConflict) {
        self.queue_conflict = None;
        self.single_conflict = Some(conflict);
    }

    pub fn clear_conflicts(&mut self) {
        self.queue_conflict = None;
        self.single_conflict = None;
    }

    /// An unresolved conflict blocks any new delivery.
    pub fn has_conflict(&self) -> bool {
        self.queue_conflict.is_some() || self.single_conflict.is_some()
    }

    pub fn observe_level(&mut self, level: Level, observed_at: Timestamp) {
        self.last_known_level = Some(ObservedLevel { level, observed_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state() -> PlayerDeliveryState {
        PlayerDeliveryState::new(
            Platform::Telegram,
            7,
            "alice",
            GameRef::new("demo.example.com", 100),
        )
    }

    #[test]
    fn test_conflicts_are_mutually_exclusive() {
        let mut s = state();
        s.set_queue_conflict(QueueConflict {
            old_level_number: 1,
            new_level_number: 3,
            queue_size: 2,
        });
        assert!(s.queue_conflict().is_some());

        s.set_single_conflict(SingleAnswerConflict {
            answer: "zebra".into(),
            old_level: Level::new(1, 1),
            new_level: Level::new(2, 2),
        });
        assert!(s.queue_conflict().is_none());
        assert!(s.single_conflict().is_some());
        assert!(s.has_conflict());

        s.clear_conflicts();
        assert!(!s.has_conflict());
    }

    #[test]
    fn test_observe_level_overwrites() {
        let mut s = state();
        let now = Utc::now();
        s.observe_level(Level::new(5, 2), now);
        s.observe_level(Level::new(6, 3), now);
        assert_eq!(s.last_known_level.unwrap().level, Level::new(6, 3));
    }
}
