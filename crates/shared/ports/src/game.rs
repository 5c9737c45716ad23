use async_trait::async_trait;
use questline_core::{Credentials, GameRef, Level, LevelState, Result, SubmitOutcome};

/// Port to the remote game server.
///
/// The production implementation (`questline-client::GameClient`) adds
/// rate limiting, level caching and transparent re-authentication
/// behind this surface; callers only see the three logical operations.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Log in and obtain a fresh session-token set.
    async fn authenticate(&self, domain: &str, login: &str, password: &str)
    -> Result<Credentials>;

    /// Read the player's current level state.
    ///
    /// `password` enables a single transparent re-authentication when
    /// the session turns out to be stale; refreshed credentials are
    /// returned inside the [`LevelState`].
    async fn fetch_level_state(
        &self,
        game: &GameRef,
        credentials: Option<&Credentials>,
        login: &str,
        password: Option<&str>,
    ) -> Result<LevelState>;

    /// Submit one answer.
    ///
    /// When `expected_level` is given, the submission is aborted with
    /// `Error::LevelChanged` (nothing posted) if the live level differs
    /// right before the write. Without it, the level resolved during
    /// the call takes that role.
    async fn submit_answer(
        &self,
        game: &GameRef,
        answer: &str,
        credentials: Option<&Credentials>,
        login: &str,
        password: Option<&str>,
        expected_level: Option<Level>,
    ) -> Result<SubmitOutcome>;
}
