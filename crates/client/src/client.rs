//! The game-server client: rate-limited, caching, re-authenticating.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use questline_core::{
    Credentials, Error, GameRef, Level, LevelState, ProtocolFamily, Result, SubmitOutcome,
    normalize_login,
};
use questline_ports::{Clock, GameApi};

use crate::auth::{AuthCoordinator, AuthKey};
use crate::cache::LevelCache;
use crate::protocol;
use crate::rate_limit::RateLimiter;
use crate::transport::Transport;

/// Client over the remote game engine.
///
/// One instance serves every player in the process: the rate limiter
/// and level cache it owns are process-wide by design, shared across
/// players on the same domain/game.
pub struct GameClient<T: Transport> {
    transport: Arc<T>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<LevelCache>,
    auth: AuthCoordinator,
    clock: Arc<dyn Clock>,
}

impl<T: Transport> GameClient<T> {
    pub fn new(transport: Arc<T>, clock: Arc<dyn Clock>) -> Self {
        let cache = Arc::new(LevelCache::new(Arc::clone(&clock)));
        GameClient {
            transport,
            rate_limiter: Arc::new(RateLimiter::new()),
            cache,
            auth: AuthCoordinator::new(),
            clock,
        }
    }

    /// Construction with externally owned pacing/caching, so tests can
    /// control both.
    pub fn with_parts(
        transport: Arc<T>,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<LevelCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        GameClient {
            transport,
            rate_limiter,
            cache,
            auth: AuthCoordinator::new(),
            clock,
        }
    }

    pub fn cache(&self) -> &LevelCache {
        &self.cache
    }

    /// Log in and extract a fresh session-token set.
    pub async fn authenticate(
        &self,
        domain: &str,
        login: &str,
        password: &str,
    ) -> Result<Credentials> {
        self.rate_limiter.acquire(domain).await;
        let response = self
            .transport
            .post_json(
                &protocol::login_url(domain),
                &[],
                json!({ "Login": login, "Password": password }),
            )
            .await?;

        if protocol::looks_like_html(&response.body) {
            // An HTML login wall instead of JSON means the engine is
            // refusing this IP, not that the password is wrong.
            let snippet = protocol::body_snippet(&response.body);
            tracing::warn!(domain, login, %snippet, "login answered with HTML; treating as IP block");
            return Err(Error::auth_required()
                .with_context("reason", "ip_block")
                .with_context("html", snippet));
        }

        let parsed = protocol::parse_login(&response.body)?;
        if parsed.error != 0 {
            return Err(protocol::classify_login_error(parsed.error).with_context("domain", domain));
        }
        if response.set_cookies.is_empty() {
            return Err(Error::protocol(
                "login_failed",
                "login succeeded but no session cookies were set",
                ProtocolFamily::Other,
                false,
            ));
        }

        tracing::info!(domain, login, "authenticated");
        Ok(Credentials::new(response.set_cookies, self.clock.now()))
    }

    /// Read the player's current level state, serving a cache hit when
    /// one is fresh. A stale session is healed with a single
    /// centralized re-authentication when a password is available.
    pub async fn fetch_level_state(
        &self,
        game: &GameRef,
        credentials: Option<&Credentials>,
        login: &str,
        password: Option<&str>,
    ) -> Result<LevelState> {
        if let Some(hit) = self.cache.get(game, login) {
            return Ok(hit.state);
        }

        let mut credentials = credentials.cloned();
        let mut refreshed = None;
        let mut reauthenticated = false;
        loop {
            let attempt = match &credentials {
                Some(c) if !c.is_empty() => self.read_state_fresh(game, c, login).await,
                _ => Err(Error::auth_required()),
            };
            match attempt {
                Ok(mut state) => {
                    state.refreshed_credentials = refreshed;
                    return Ok(state);
                }
                Err(error) => match self
                    .maybe_reauthenticate(game, login, password, &error, reauthenticated)
                    .await?
                {
                    Some(new_credentials) => {
                        reauthenticated = true;
                        credentials = Some(new_credentials.clone());
                        refreshed = Some(new_credentials);
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// Submit one answer. The critical path:
    ///
    /// 1. require usable credentials
    /// 2. resolve the current level (cache or fresh read)
    /// 3. reject while an answer-block window is active
    /// 4. fix the expected level (explicit argument wins)
    /// 5. read the level state again right before the write and abort,
    ///    posting nothing, if it moved
    /// 6. post the answer and interpret the verdict
    /// 7. on a stale session, one centralized re-auth and one retry of
    ///    the whole sequence; any other first-attempt failure
    ///    invalidates the level cache before propagating
    pub async fn submit_answer(
        &self,
        game: &GameRef,
        answer: &str,
        credentials: Option<&Credentials>,
        login: &str,
        password: Option<&str>,
        expected_level: Option<Level>,
    ) -> Result<SubmitOutcome> {
        let mut credentials = credentials.cloned();
        let mut refreshed = None;
        let mut reauthenticated = false;
        loop {
            let attempt = self
                .try_submit(game, answer, credentials.as_ref(), login, expected_level)
                .await;
            match attempt {
                Ok(mut outcome) => {
                    outcome.refreshed_credentials = refreshed;
                    return Ok(outcome);
                }
                Err(error) => {
                    let retry = match self
                        .maybe_reauthenticate(game, login, password, &error, reauthenticated)
                        .await
                    {
                        Ok(retry) => retry,
                        Err(reauth_error) => {
                            // A session that cannot be renewed leaves
                            // the cached level suspect too.
                            self.cache.invalidate(game, login);
                            return Err(
                                reauth_error.with_context("game_id", game.game_id.to_string())
                            );
                        }
                    };
                    match retry {
                        Some(new_credentials) => {
                            tracing::debug!(%game, login, "retrying submission with fresh credentials");
                            reauthenticated = true;
                            credentials = Some(new_credentials.clone());
                            refreshed = Some(new_credentials);
                        }
                        None => {
                            if !reauthenticated {
                                // The cause of failure may itself be
                                // stale level knowledge.
                                self.cache.invalidate(game, login);
                            }
                            return Err(error.with_context("game_id", game.game_id.to_string()));
                        }
                    }
                }
            }
        }
    }

    /// Decides whether `error` warrants the single transparent
    /// re-authentication, and performs it through the single-flight
    /// coordinator if so. `Ok(None)` means "do not retry".
    async fn maybe_reauthenticate(
        &self,
        game: &GameRef,
        login: &str,
        password: Option<&str>,
        error: &Error,
        already_retried: bool,
    ) -> Result<Option<Credentials>> {
        if already_retried || !error.is_auth() {
            return Ok(None);
        }
        if let Error::AuthRequired {
            reauth_failed: true,
            ..
        } = error
        {
            return Ok(None);
        }
        let Some(password) = password else {
            return Ok(None);
        };

        let key = AuthKey::new(game.domain.clone(), normalize_login(login));
        let flight = self.authenticate(&game.domain, login, password);
        let credentials = self.auth.single_flight(key, move || flight).await?;
        Ok(Some(credentials))
    }

    async fn try_submit(
        &self,
        game: &GameRef,
        answer: &str,
        credentials: Option<&Credentials>,
        login: &str,
        expected_level: Option<Level>,
    ) -> Result<SubmitOutcome> {
        let credentials = match credentials {
            Some(c) if !c.is_empty() => c,
            _ => return Err(Error::auth_required()),
        };

        let current = match self.cache.get(game, login) {
            Some(hit) => hit.state,
            None => self.read_state_fresh(game, credentials, login).await?,
        };

        if let Some(secs) = current.block_remaining_secs {
            if secs > 0 {
                return Err(Error::protocol(
                    "19",
                    format!("answers are blocked for another {secs}s"),
                    ProtocolFamily::AnswerBlock,
                    true,
                ));
            }
        }

        let expected = expected_level.unwrap_or(current.level);

        // Second, independent read right before the post. Best effort:
        // the engine has no conditional submit, so two reads are the
        // closest we get to compare-and-swap.
        let fresh = self.read_state_fresh(game, credentials, login).await?;
        if fresh.level.id != expected.id {
            tracing::warn!(
                %game,
                login,
                expected = expected.number,
                live = fresh.level.number,
                "level moved before the answer was posted"
            );
            return Err(Error::level_changed(expected, fresh.level, answer));
        }

        self.rate_limiter.acquire(&game.domain).await;
        let payload = json!({
            "LevelId": expected.id,
            "LevelNumber": expected.number,
            "LevelAction": { "Answer": answer },
        });
        let response = self
            .transport
            .post_json(&protocol::play_url(game), &credentials.cookies, payload)
            .await?;

        if protocol::looks_like_html(&response.body) {
            return Err(Error::auth_required().with_context("reason", "html_response"));
        }
        let body = protocol::parse_game_state(&response.body)?;
        let event = body.event.ok_or_else(|| {
            Error::protocol(
                "missing_event",
                "engine response carries no event field",
                ProtocolFamily::Other,
                false,
            )
        })?;
        if event != 0 {
            if protocol::invalidates_cache(event) {
                self.cache.invalidate(game, login);
            }
            // The engine can catch the move at post time; when its
            // response names the new level, carry both so the player
            // can arbitrate.
            if event == protocol::EVENT_LEVEL_CHANGED {
                if let Some(new_level) = body.level.as_ref().map(|l| l.to_level()) {
                    return Err(Error::level_changed(expected, new_level, answer));
                }
            }
            return Err(classified_event(event, &body));
        }

        let level_body = body.level.as_ref().ok_or_else(|| {
            Error::protocol(
                "missing_level",
                "engine response carries no level",
                ProtocolFamily::Other,
                false,
            )
        })?;
        let state = level_body.to_state();
        let verdict = body
            .engine_action
            .as_ref()
            .and_then(|a| a.level_action.as_ref())
            .and_then(|l| l.is_correct_answer);

        let mut text = match verdict {
            None => format!("Answer \"{answer}\" was not processed by the engine"),
            Some(true) => format!("Answer \"{answer}\" is correct"),
            Some(false) => format!("Answer \"{answer}\" is incorrect"),
        };
        if state.is_passed {
            text.push_str("\nLevel passed, on to the next one!");
            self.cache.invalidate(game, login);
        } else {
            self.cache.insert(game, login, &state);
        }

        tracing::debug!(%game, login, level = state.level.number, ?verdict, "answer posted");
        Ok(SubmitOutcome {
            level: state.level,
            verdict,
            level_passed: state.is_passed,
            text,
            refreshed_credentials: None,
        })
    }

    /// One rate-limited GET of the level state, bypassing the cache;
    /// a successful read refreshes the cache.
    async fn read_state_fresh(
        &self,
        game: &GameRef,
        credentials: &Credentials,
        login: &str,
    ) -> Result<LevelState> {
        self.rate_limiter.acquire(&game.domain).await;
        let response = self
            .transport
            .get(&protocol::play_url(game), &credentials.cookies)
            .await?;

        if protocol::looks_like_html(&response.body) {
            return Err(Error::auth_required().with_context("reason", "html_response"));
        }
        let body = protocol::parse_game_state(&response.body)?;
        let event = body.event.ok_or_else(|| {
            Error::protocol(
                "missing_event",
                "engine response carries no event field",
                ProtocolFamily::Other,
                false,
            )
        })?;
        if event != 0 {
            if protocol::invalidates_cache(event) {
                self.cache.invalidate(game, login);
            }
            return Err(classified_event(event, &body));
        }

        let level_body = body.level.as_ref().ok_or_else(|| {
            Error::protocol(
                "missing_level",
                "engine response carries no level",
                ProtocolFamily::Other,
                false,
            )
        })?;
        let state = level_body.to_state();
        self.cache.insert(game, login, &state);
        Ok(state)
    }
}

fn classified_event(event: i32, body: &protocol::GameStateBody) -> Error {
    protocol::classify_event(event, body.level.as_ref()).with_context("event", event.to_string())
}

#[async_trait]
impl<T: Transport + 'static> GameApi for GameClient<T> {
    async fn authenticate(
        &self,
        domain: &str,
        login: &str,
        password: &str,
    ) -> Result<Credentials> {
        GameClient::authenticate(self, domain, login, password).await
    }

    async fn fetch_level_state(
        &self,
        game: &GameRef,
        credentials: Option<&Credentials>,
        login: &str,
        password: Option<&str>,
    ) -> Result<LevelState> {
        GameClient::fetch_level_state(self, game, credentials, login, password).await
    }

    async fn submit_answer(
        &self,
        game: &GameRef,
        answer: &str,
        credentials: Option<&Credentials>,
        login: &str,
        password: Option<&str>,
        expected_level: Option<Level>,
    ) -> Result<SubmitOutcome> {
        GameClient::submit_answer(self, game, answer, credentials, login, password, expected_level)
            .await
    }
}
