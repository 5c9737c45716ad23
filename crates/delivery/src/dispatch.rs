//! Single-answer delivery and conflict arbitration.
//!
//! Propagation policy for an interactive send:
//! - connectivity-shaped failures become durable backlog entries, the
//!   player is told the answer is queued, no error surfaces
//! - a level change pauses delivery and asks the player, the core
//!   never guesses which level to commit to
//! - terminal failures surface verbatim, no retry

use std::sync::Arc;

use questline_core::{
    BacklogEntry, Error, Level, PlayerKey, ProtocolFamily, Result, SingleAnswerConflict,
};
use questline_ports::{Clock, GameApi, Messenger, PlayerStore};

/// What happened to one inbound answer.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Posted to the game; `text` is the verdict line shown to the player.
    Delivered { text: String },
    /// Folded into the accumulation buffer, awaiting a batch decision.
    Accumulated,
    /// Connectivity failed; the answer went into the durable backlog.
    QueuedForRetry,
    /// A level conflict must be resolved before this can go anywhere.
    ConflictPending,
    /// Refused with a terminal reason, surfaced to the player.
    Rejected { text: String },
}

pub struct Dispatcher {
    store: Arc<dyn PlayerStore>,
    messenger: Arc<dyn Messenger>,
    game: Arc<dyn GameApi>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PlayerStore>,
        messenger: Arc<dyn Messenger>,
        game: Arc<dyn GameApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Dispatcher {
            store,
            messenger,
            game,
            clock,
        }
    }

    /// Deliver one answer right now. `expected_level` pins the target
    /// level (used when replaying a resolved conflict); otherwise the
    /// live level resolved during the call is the target.
    pub async fn deliver_single(
        &self,
        key: &PlayerKey,
        answer: &str,
        expected_level: Option<Level>,
    ) -> Result<DeliveryOutcome> {
        let mut state = self.store.load(key).await?;

        if state.has_conflict() {
            self.messenger
                .send_message(
                    key,
                    "There is an unresolved level conflict; resolve it before sending new answers.",
                )
                .await?;
            return Ok(DeliveryOutcome::ConflictPending);
        }

        let result = self
            .game
            .submit_answer(
                &state.game,
                answer,
                state.credentials.as_ref(),
                &state.login,
                state.password.as_deref(),
                expected_level,
            )
            .await;

        // The engine can also notice the move only at post time (event
        // 16), without naming the level pair. Recover both levels so
        // this pauses for arbitration like any other level change; if
        // they cannot be recovered the generic rejection stands.
        let result = match result {
            Err(
                error @ Error::Protocol {
                    family: ProtocolFamily::LevelChanged,
                    ..
                },
            ) => {
                let old_level =
                    expected_level.or_else(|| state.last_known_level.map(|observed| observed.level));
                let live = self
                    .game
                    .fetch_level_state(
                        &state.game,
                        state.credentials.as_ref(),
                        &state.login,
                        state.password.as_deref(),
                    )
                    .await;
                match (old_level, live) {
                    (Some(old_level), Ok(live)) => {
                        Err(Error::level_changed(old_level, live.level, answer))
                    }
                    _ => Err(error),
                }
            }
            other => other,
        };

        match result {
            Ok(outcome) => {
                if let Some(new_credentials) = &outcome.refreshed_credentials {
                    state.credentials = Some(new_credentials.clone());
                }
                state.observe_level(outcome.level, self.clock.now());
                self.store.save(key, &state).await?;
                self.messenger.send_message(key, &outcome.text).await?;
                Ok(DeliveryOutcome::Delivered { text: outcome.text })
            }
            Err(Error::LevelChanged {
                old_level,
                new_level,
                answer: held_answer,
                ..
            }) => {
                state.set_single_conflict(SingleAnswerConflict {
                    answer: held_answer.clone(),
                    old_level,
                    new_level,
                });
                self.store.save(key, &state).await?;
                let text = format!(
                    "The game moved from level {} to level {} before \"{}\" was sent. \
                     Send it to the new level, or cancel it?",
                    old_level.number, new_level.number, held_answer
                );
                self.messenger.send_message(key, &text).await?;
                Ok(DeliveryOutcome::ConflictPending)
            }
            Err(error @ (Error::Network { .. } | Error::RateLimited { .. }))
                if error.retryable() =>
            {
                tracing::info!(%key, %error, "connectivity failure, queueing answer for replay");
                let remembered = state.last_known_level.map(|observed| observed.level);
                state
                    .answer_backlog
                    .push(BacklogEntry::new(answer, self.clock.now(), remembered));
                self.store.save(key, &state).await?;
                self.messenger
                    .send_message(
                        key,
                        &format!(
                            "Could not reach the game server; \"{answer}\" is queued and will \
                             be retried."
                        ),
                    )
                    .await?;
                Ok(DeliveryOutcome::QueuedForRetry)
            }
            Err(error @ Error::AuthRequired { .. }) => {
                state.credentials = None;
                self.store.save(key, &state).await?;
                tracing::warn!(%key, %error, "session unusable, asking the player to log in");
                let text = "The game session expired and could not be renewed; \
                            please log in again."
                    .to_string();
                self.messenger.send_message(key, &text).await?;
                Ok(DeliveryOutcome::Rejected { text })
            }
            Err(error) => {
                let text = error.to_string();
                self.messenger.send_message(key, &text).await?;
                Ok(DeliveryOutcome::Rejected { text })
            }
        }
    }

    /// Apply the player's decision for a pending single-answer
    /// conflict: redirect the held answer to the new level, or drop it.
    pub async fn resolve_single_conflict(
        &self,
        key: &PlayerKey,
        redirect: bool,
    ) -> Result<DeliveryOutcome> {
        let mut state = self.store.load(key).await?;
        let Some(conflict) = state.single_conflict().cloned() else {
            let text = "There is no pending answer conflict.".to_string();
            self.messenger.send_message(key, &text).await?;
            return Ok(DeliveryOutcome::Rejected { text });
        };

        state.clear_conflicts();
        self.store.save(key, &state).await?;

        if redirect {
            self.deliver_single(key, &conflict.answer, Some(conflict.new_level))
                .await
        } else {
            let text = format!("\"{}\" was dropped.", conflict.answer);
            self.messenger.send_message(key, &text).await?;
            Ok(DeliveryOutcome::Rejected { text })
        }
    }
}
