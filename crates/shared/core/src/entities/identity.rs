use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat platform an answer arrived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Telegram,
    Other(String),
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Telegram => write!(f, "telegram"),
            Platform::Other(name) => write!(f, "{name}"),
        }
    }
}

/// One player as seen by the delivery subsystem: a platform plus the
/// platform's external user id. All per-player single-flight guards and
/// state lookups key on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerKey {
    pub platform: Platform,
    pub user_id: i64,
}

impl PlayerKey {
    pub fn new(platform: Platform, user_id: i64) -> Self {
        PlayerKey { platform, user_id }
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.user_id)
    }
}

/// Target game: engine domain plus the numeric game id on that domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameRef {
    pub domain: String,
    pub game_id: u32,
}

impl GameRef {
    pub fn new(domain: impl Into<String>, game_id: u32) -> Self {
        GameRef {
            domain: domain.into(),
            game_id,
        }
    }
}

impl fmt::Display for GameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.game_id)
    }
}

/// Normalized form of a game login, used in process-wide cache keys so
/// the same account reached through different spellings shares one entry.
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_login() {
        assert_eq!(normalize_login("  Player One "), "player one");
        assert_eq!(normalize_login("ALICE"), "alice");
    }

    #[test]
    fn test_player_key_display() {
        let key = PlayerKey::new(Platform::Telegram, 42);
        assert_eq!(key.to_string(), "telegram:42");
    }
}
