//! Offline-queue replay.
//!
//! Answers that failed on connectivity wait in the durable backlog;
//! this processor replays them with bounded retries, a pre-flight
//! level-consistency check, pacing between deliveries, and a single
//! throttled progress message.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::{Duration, Instant};

use questline_core::{MessageId, PlayerKey, QueueConflict, Result};
use questline_ports::{Clock, GameApi, Messenger, PlayerStore};

/// Pacing between successive deliveries.
pub const QUEUE_PACING: Duration = Duration::from_millis(1200);

/// Cooldown after clearing credentials on an auth failure, before the
/// same item is retried.
pub const AUTH_RETRY_COOLDOWN: Duration = Duration::from_secs(5);

/// An item is dropped after this many failed attempts.
pub const MAX_ITEM_ATTEMPTS: u32 = 3;

/// Progress message cadence: whichever comes first.
const PROGRESS_EVERY_ITEMS: u32 = 4;
const PROGRESS_EVERY: Duration = Duration::from_secs(5);

/// Outcome of one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// False when the entry guard refused the run (already active) or
    /// the backlog was empty.
    pub ran: bool,
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// A queue conflict was raised; nothing was dequeued.
    pub conflict: bool,
}

pub struct QueueProcessor {
    store: Arc<dyn PlayerStore>,
    messenger: Arc<dyn Messenger>,
    game: Arc<dyn GameApi>,
    clock: Arc<dyn Clock>,
    active: DashMap<PlayerKey, ()>,
    pacing: Duration,
    auth_cooldown: Duration,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn PlayerStore>,
        messenger: Arc<dyn Messenger>,
        game: Arc<dyn GameApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_pacing(store, messenger, game, clock, QUEUE_PACING, AUTH_RETRY_COOLDOWN)
    }

    /// Pacing/cooldown injection for tests.
    pub fn with_pacing(
        store: Arc<dyn PlayerStore>,
        messenger: Arc<dyn Messenger>,
        game: Arc<dyn GameApi>,
        clock: Arc<dyn Clock>,
        pacing: Duration,
        auth_cooldown: Duration,
    ) -> Self {
        QueueProcessor {
            store,
            messenger,
            game,
            clock,
            active: DashMap::new(),
            pacing,
            auth_cooldown,
        }
    }

    /// Replay the player's backlog. No-op when the backlog is empty or
    /// a run is already active for this player.
    pub async fn process_backlog(&self, key: &PlayerKey) -> Result<QueueReport> {
        if self.active.insert(key.clone(), ()).is_some() {
            tracing::debug!(%key, "queue replay already active, skipping");
            return Ok(QueueReport::default());
        }
        let result = self.run(key).await;
        self.active.remove(key);
        result
    }

    async fn run(&self, key: &PlayerKey) -> Result<QueueReport> {
        let mut state = self.store.load(key).await?;
        if state.answer_backlog.is_empty() {
            return Ok(QueueReport::default());
        }
        if state.has_conflict() {
            self.messenger
                .send_message(
                    key,
                    "The queue is paused by an unresolved level conflict.",
                )
                .await?;
            return Ok(QueueReport {
                ran: false,
                remaining: state.answer_backlog.len(),
                conflict: true,
                ..Default::default()
            });
        }

        // Pre-flight: the head item's remembered level must match the
        // live one, otherwise the player arbitrates before anything is
        // dequeued.
        if let Some(head_level) = state.answer_backlog[0].level {
            let live = self
                .game
                .fetch_level_state(
                    &state.game,
                    state.credentials.as_ref(),
                    &state.login,
                    state.password.as_deref(),
                )
                .await?;
            if let Some(new_credentials) = &live.refreshed_credentials {
                state.credentials = Some(new_credentials.clone());
            }
            if live.level.id != head_level.id {
                let queue_size = state.answer_backlog.len();
                state.set_queue_conflict(QueueConflict {
                    old_level_number: head_level.number,
                    new_level_number: live.level.number,
                    queue_size,
                });
                self.store.save(key, &state).await?;
                self.messenger
                    .send_message(
                        key,
                        &format!(
                            "Your queue of {queue_size} answers was aimed at level {}, but \
                             the game is now on level {}. Send them to the new level, or \
                             cancel the queue?",
                            head_level.number, live.level.number
                        ),
                    )
                    .await?;
                tracing::info!(%key, queue_size, "queue conflict raised, replay stopped");
                return Ok(QueueReport {
                    ran: true,
                    remaining: queue_size,
                    conflict: true,
                    ..Default::default()
                });
            }
            self.store.save(key, &state).await?;
        }

        let total = state.answer_backlog.len();
        tracing::info!(%key, total, "replaying answer backlog");
        let mut report = QueueReport {
            ran: true,
            ..Default::default()
        };
        let mut progress = ProgressThrottle::new(self.messenger.as_ref(), key);
        let mut index = 0;
        let mut first_request = true;
        let mut auth_retried_current = false;

        while index < state.answer_backlog.len() {
            if !first_request {
                tokio::time::sleep(self.pacing).await;
            }
            first_request = false;

            let entry = state.answer_backlog[index].clone();
            let result = self
                .game
                .submit_answer(
                    &state.game,
                    &entry.answer,
                    state.credentials.as_ref(),
                    &state.login,
                    state.password.as_deref(),
                    entry.level,
                )
                .await;

            match result {
                Ok(outcome) => {
                    if let Some(new_credentials) = &outcome.refreshed_credentials {
                        state.credentials = Some(new_credentials.clone());
                    }
                    state.observe_level(outcome.level, self.clock.now());
                    state.answer_backlog.remove(index);
                    report.delivered += 1;
                    auth_retried_current = false;
                    self.store.save(key, &state).await?;
                    progress.tick(processed(&report), total).await;
                }
                Err(error) if error.is_ignorable_for_queue() => {
                    tracing::debug!(%key, %error, answer = %entry.answer, "skipping stale queued answer");
                    state.answer_backlog.remove(index);
                    report.skipped += 1;
                    auth_retried_current = false;
                    self.store.save(key, &state).await?;
                    progress.tick(processed(&report), total).await;
                }
                Err(error) if error.is_auth() && !auth_retried_current => {
                    // Clear the stored credentials so the retry takes
                    // the full re-authentication path, then try the
                    // same item again after a cooldown.
                    tracing::warn!(%key, %error, "auth failure during replay, retrying item after cooldown");
                    state.credentials = None;
                    self.store.save(key, &state).await?;
                    auth_retried_current = true;
                    tokio::time::sleep(self.auth_cooldown).await;
                }
                Err(error) => {
                    let item = &mut state.answer_backlog[index];
                    item.failed_attempts += 1;
                    item.last_error = Some(error.to_string());
                    auth_retried_current = false;
                    if item.failed_attempts >= MAX_ITEM_ATTEMPTS {
                        tracing::warn!(%key, answer = %item.answer, "dropping item after {MAX_ITEM_ATTEMPTS} failures");
                        state.answer_backlog.remove(index);
                        report.dropped += 1;
                    } else {
                        // A failing item never blocks the rest.
                        index += 1;
                    }
                    self.store.save(key, &state).await?;
                    progress.tick(processed(&report), total).await;
                }
            }
        }

        report.remaining = state.answer_backlog.len();
        self.store.save(key, &state).await?;

        let summary = if report.delivered == total {
            format!("All {total} queued answers were delivered.")
        } else {
            format!(
                "Queue replay finished: {} delivered, {} skipped, {} dropped, {} remaining.",
                report.delivered, report.skipped, report.dropped, report.remaining
            )
        };
        progress.flush(&summary).await;
        Ok(report)
    }

    /// Apply the player's decision for a pending queue conflict: re-aim
    /// the backlog at the live level and replay, or drop the queue.
    pub async fn resolve_conflict(
        &self,
        key: &PlayerKey,
        send_to_new_level: bool,
    ) -> Result<QueueReport> {
        let mut state = self.store.load(key).await?;
        if state.queue_conflict().is_none() {
            self.messenger
                .send_message(key, "There is no pending queue conflict.")
                .await?;
            return Ok(QueueReport::default());
        }
        state.clear_conflicts();

        if send_to_new_level {
            // Forget the remembered levels; the replay resolves the
            // live level per item.
            for entry in &mut state.answer_backlog {
                entry.level = None;
            }
            self.store.save(key, &state).await?;
            self.process_backlog(key).await
        } else {
            let dropped = state.answer_backlog.len();
            state.answer_backlog.clear();
            self.store.save(key, &state).await?;
            self.messenger
                .send_message(key, &format!("Queue cancelled, {dropped} answers dropped."))
                .await?;
            Ok(QueueReport {
                ran: true,
                dropped,
                ..Default::default()
            })
        }
    }
}

fn processed(report: &QueueReport) -> usize {
    report.delivered + report.skipped + report.dropped
}

/// Single progress message, throttled so the replay does not trip the
/// chat transport's own rate limits.
struct ProgressThrottle<'a> {
    messenger: &'a dyn Messenger,
    key: &'a PlayerKey,
    message_id: Option<MessageId>,
    since_update: u32,
    last_update: Instant,
}

impl<'a> ProgressThrottle<'a> {
    fn new(messenger: &'a dyn Messenger, key: &'a PlayerKey) -> Self {
        ProgressThrottle {
            messenger,
            key,
            message_id: None,
            since_update: 0,
            last_update: Instant::now(),
        }
    }

    async fn tick(&mut self, processed: usize, total: usize) {
        self.since_update += 1;
        if self.since_update >= PROGRESS_EVERY_ITEMS || self.last_update.elapsed() >= PROGRESS_EVERY
        {
            self.push(&format!("Replaying queue: {processed}/{total} processed."))
                .await;
        }
    }

    async fn flush(&mut self, text: &str) {
        self.push(text).await;
    }

    async fn push(&mut self, text: &str) {
        match self
            .messenger
            .send_or_update(self.key, text, self.message_id)
            .await
        {
            Ok(id) => {
                self.message_id = Some(id);
                self.since_update = 0;
                self.last_update = Instant::now();
            }
            Err(error) => {
                tracing::warn!(key = %self.key, %error, "progress update failed");
            }
        }
    }
}
