mod credentials;
mod identity;
mod level;
mod player;

pub use credentials::Credentials;
pub use identity::{GameRef, Platform, PlayerKey, normalize_login};
pub use level::{Level, LevelState, ObservedLevel, SubmitOutcome};
pub use player::{
    BacklogEntry, PendingAnswer, PlayerDeliveryState, QueueConflict, SingleAnswerConflict,
};
