//! Process-wide level cache.
//!
//! A successful level-state read is cached for 30 seconds, keyed by
//! domain + game + normalized login, to spare redundant reads from
//! collaborators that only need "what level am I on". Entries are
//! explicitly invalidated whenever the server reports the level
//! changed, was passed, or was dismissed.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;

use questline_core::{GameRef, LevelState, Timestamp, normalize_login};
use questline_ports::Clock;

/// Entry TTL in milliseconds.
pub const LEVEL_CACHE_TTL_MS: i64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    domain: String,
    game_id: u32,
    login: String,
}

impl CacheKey {
    fn new(game: &GameRef, login: &str) -> Self {
        CacheKey {
            domain: game.domain.clone(),
            game_id: game.game_id,
            login: normalize_login(login),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedLevel {
    pub state: LevelState,
    pub cached_at: Timestamp,
}

pub struct LevelCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: DashMap<CacheKey, CachedLevel>,
}

impl LevelCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        LevelCache {
            clock,
            ttl: Duration::milliseconds(LEVEL_CACHE_TTL_MS),
            entries: DashMap::new(),
        }
    }

    /// Fresh entry or nothing; an entry older than the TTL is removed
    /// and reported as a miss.
    pub fn get(&self, game: &GameRef, login: &str) -> Option<CachedLevel> {
        let key = CacheKey::new(game, login);
        let entry = {
            let entry = self.entries.get(&key)?;
            entry.value().clone()
        };
        if self.clock.now() - entry.cached_at > self.ttl {
            self.entries.remove(&key);
            return None;
        }
        Some(entry)
    }

    pub fn insert(&self, game: &GameRef, login: &str, state: &LevelState) {
        let mut state = state.clone();
        // Credentials never belong in a process-wide cache.
        state.refreshed_credentials = None;
        self.entries.insert(
            CacheKey::new(game, login),
            CachedLevel {
                state,
                cached_at: self.clock.now(),
            },
        );
    }

    pub fn invalidate(&self, game: &GameRef, login: &str) {
        self.entries.remove(&CacheKey::new(game, login));
    }
}
