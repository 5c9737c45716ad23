//! Single-flight re-authentication.
//!
//! When several in-flight operations hit a stale session at once, only
//! one login request may go out; the rest adopt its outcome. Without
//! this, one expired session fans out into a burst of logins and the
//! engine answers with "brute-force suspected".

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::Mutex;

use questline_core::{Credentials, Error, Result};

/// Authentication identity: one flight per (domain, normalized login).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthKey {
    pub domain: String,
    pub login: String,
}

impl AuthKey {
    pub fn new(domain: impl Into<String>, login: impl Into<String>) -> Self {
        AuthKey {
            domain: domain.into(),
            login: login.into(),
        }
    }
}

#[derive(Default)]
struct Slot {
    /// Bumped after every completed flight. A caller that queued behind
    /// the mutex and finds the generation moved knows a flight finished
    /// while it waited, and must adopt that outcome instead of starting
    /// its own.
    generation: AtomicU64,
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    last_outcome: Option<Result<Credentials>>,
}

/// Single-flight guard per player identity.
pub struct AuthCoordinator {
    slots: DashMap<AuthKey, Arc<Slot>>,
}

impl AuthCoordinator {
    pub fn new() -> Self {
        AuthCoordinator {
            slots: DashMap::new(),
        }
    }

    /// Runs `do_auth` unless an equivalent flight completes first, in
    /// which case its outcome is adopted and `do_auth` is never polled.
    ///
    /// Every failure surfaces as `AuthRequired { reauth_failed: true }`
    /// so callers stop ping-pong retrying, whether they initiated the
    /// flight or merely waited on it.
    pub async fn single_flight<F, Fut>(&self, key: AuthKey, do_auth: F) -> Result<Credentials>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Credentials>>,
    {
        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Slot::default()))
            .clone();

        let entered_generation = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;

        if slot.generation.load(Ordering::Acquire) != entered_generation {
            return match &state.last_outcome {
                Some(Ok(credentials)) => {
                    tracing::debug!(login = %key.login, "adopting credentials from a concurrent authentication");
                    Ok(credentials.clone())
                }
                _ => {
                    tracing::debug!(login = %key.login, "a concurrent authentication failed while waiting");
                    Err(Error::reauth_failed().with_context("login", key.login))
                }
            };
        }

        tracing::debug!(domain = %key.domain, login = %key.login, "starting authentication flight");
        let outcome = do_auth().await;
        state.last_outcome = Some(outcome.clone());
        slot.generation.fetch_add(1, Ordering::Release);

        match outcome {
            Ok(credentials) => Ok(credentials),
            Err(cause) => {
                tracing::warn!(login = %key.login, %cause, "authentication flight failed");
                Err(Error::reauth_failed()
                    .with_context("login", key.login)
                    .with_context("cause", cause.to_string()))
            }
        }
    }
}

impl Default for AuthCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
