//! Batch buffer: the per-player drain loop.
//!
//! Every inbound answer lands in a transient pending list and wakes
//! the drain loop. The loop either delivers the oldest entry (normal
//! play), detects a pasted burst and switches the player into
//! accumulation mode, or schedules a wake-up and goes quiet. The loop
//! is single-flight per player: a trigger during an active drain only
//! requests one more pass instead of starting a parallel loop.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use questline_core::{
    BacklogEntry, Error, Level, PendingAnswer, PlayerKey, ProtocolFamily, Result, Timestamp,
};
use questline_ports::{Clock, GameApi, Messenger, PlayerStore};

use crate::burst::is_burst;
use crate::dispatch::{DeliveryOutcome, Dispatcher};

/// How long a lone answer waits for company before being delivered.
/// Equal to the burst gap: if no follow-up arrives within it, the
/// answer cannot be part of a burst anymore.
pub const SINGLE_DELAY_MS: i64 = 2_500;

/// Accumulation quiet time before the player is asked to decide.
pub const IDLE_PROMPT_MS: u64 = 5_000;

/// Drain-loop state machine. A second trigger while a drain is active
/// coalesces into one more pass rather than a parallel loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainState {
    #[default]
    Idle,
    Draining,
    DrainingAndRequeued,
}

/// The player's decision over an accumulated batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    SendAll,
    CancelAll,
    List,
    /// Re-aim the batch at the current live level, then send.
    RedirectToCurrent,
}

/// Outcome of a bulk send.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchSendReport {
    /// Nothing buffered, or accumulation was not active.
    Nothing,
    /// Every buffered answer was handled.
    Completed { sent: usize, queued: usize },
    /// The anchor level no longer matches the live level; nothing was
    /// sent and the player was asked to redirect or cancel.
    Paused { old_level: Level, new_level: Level },
    /// The level changed mid-send; the sent prefix is gone from the
    /// buffer and the player was asked about the remainder.
    Interrupted {
        sent: usize,
        remaining: usize,
        old_level: Level,
        new_level: Level,
    },
    /// A terminal failure stopped the send.
    Stopped { sent: usize, remaining: usize },
}

struct PendingEntry {
    answer: String,
    captured_at: Timestamp,
    slot: oneshot::Sender<DeliveryOutcome>,
}

#[derive(Default)]
struct BatchInner {
    pending: Vec<PendingEntry>,
    drain: DrainState,
    /// Stamps for the wake/idle timers; a timer that fires with a
    /// stale stamp is a no-op. Timers are cancelled by replacement,
    /// never cooperatively.
    wake_generation: u64,
    idle_generation: u64,
}

enum Step {
    Deliver(PendingEntry),
    Accumulate {
        entries: Vec<PendingEntry>,
        entering: bool,
    },
    Wake(i64),
    Quiet,
}

pub struct BatchCoordinator {
    store: Arc<dyn PlayerStore>,
    messenger: Arc<dyn Messenger>,
    game: Arc<dyn GameApi>,
    clock: Arc<dyn Clock>,
    dispatcher: Dispatcher,
    batches: DashMap<PlayerKey, Arc<Mutex<BatchInner>>>,
}

impl BatchCoordinator {
    pub fn new(
        store: Arc<dyn PlayerStore>,
        messenger: Arc<dyn Messenger>,
        game: Arc<dyn GameApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&messenger),
            Arc::clone(&game),
            Arc::clone(&clock),
        );
        BatchCoordinator {
            store,
            messenger,
            game,
            clock,
            dispatcher,
            batches: DashMap::new(),
        }
    }

    fn batch(&self, key: &PlayerKey) -> Arc<Mutex<BatchInner>> {
        self.batches.entry(key.clone()).or_default().clone()
    }

    /// Accept one inbound answer. The returned receiver resolves once
    /// the drain loop has decided the answer's fate.
    pub fn submit(self: &Arc<Self>, key: &PlayerKey, answer: impl Into<String>) -> oneshot::Receiver<DeliveryOutcome> {
        let (sender, receiver) = oneshot::channel();
        {
            let batch = self.batch(key);
            let mut inner = batch.lock();
            inner.pending.push(PendingEntry {
                answer: answer.into(),
                captured_at: self.clock.now(),
                slot: sender,
            });
        }
        self.trigger_drain(key);
        receiver
    }

    /// Wake the drain loop; coalesces if one is already running.
    pub fn trigger_drain(self: &Arc<Self>, key: &PlayerKey) {
        {
            let batch = self.batch(key);
            let mut inner = batch.lock();
            match inner.drain {
                DrainState::Idle => inner.drain = DrainState::Draining,
                DrainState::Draining => {
                    inner.drain = DrainState::DrainingAndRequeued;
                    return;
                }
                DrainState::DrainingAndRequeued => return,
            }
        }
        let this = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move {
            this.drain_loop(key).await;
        });
    }

    async fn drain_loop(self: Arc<Self>, key: PlayerKey) {
        loop {
            let step = match self.next_step(&key).await {
                Ok(step) => step,
                Err(error) => {
                    tracing::error!(%key, %error, "drain step failed");
                    // Pending entries must not hang on their oneshot
                    // slots; their senders get an answer either way.
                    self.fail_pending(&key, &error);
                    Step::Quiet
                }
            };

            match step {
                Step::Deliver(entry) => {
                    let outcome = match self
                        .dispatcher
                        .deliver_single(&key, &entry.answer, None)
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(error) => {
                            tracing::error!(%key, %error, "single delivery failed");
                            DeliveryOutcome::Rejected {
                                text: error.to_string(),
                            }
                        }
                    };
                    let _ = entry.slot.send(outcome);
                    continue;
                }
                Step::Accumulate { entries, entering } => {
                    if let Err(error) = self.accumulate(&key, entries, entering).await {
                        tracing::error!(%key, %error, "accumulation failed");
                    }
                    continue;
                }
                Step::Wake(in_ms) => self.schedule_wake(&key, in_ms),
                Step::Quiet => {}
            }

            let run_again = {
                let batch = self.batch(&key);
                let mut inner = batch.lock();
                if inner.drain == DrainState::DrainingAndRequeued {
                    inner.drain = DrainState::Draining;
                    true
                } else {
                    inner.drain = DrainState::Idle;
                    false
                }
            };
            if !run_again {
                break;
            }
        }
    }

    /// Resolve every queued outcome slot with a rejection.
    fn fail_pending(&self, key: &PlayerKey, error: &Error) {
        let batch = self.batch(key);
        let entries: Vec<PendingEntry> = batch.lock().pending.drain(..).collect();
        for entry in entries {
            let _ = entry.slot.send(DeliveryOutcome::Rejected {
                text: error.to_string(),
            });
        }
    }

    async fn next_step(&self, key: &PlayerKey) -> Result<Step> {
        let state = self.store.load(key).await?;
        let now = self.clock.now();

        let batch = self.batch(key);
        let mut inner = batch.lock();
        if inner.pending.is_empty() {
            return Ok(Step::Quiet);
        }

        // Once in batch mode, everything joins the batch.
        if state.accumulation_active {
            return Ok(Step::Accumulate {
                entries: inner.pending.drain(..).collect(),
                entering: false,
            });
        }

        let stamps: Vec<Timestamp> = inner.pending.iter().map(|e| e.captured_at).collect();
        if is_burst(&stamps) {
            return Ok(Step::Accumulate {
                entries: inner.pending.drain(..).collect(),
                entering: true,
            });
        }

        let oldest_age_ms = (now - inner.pending[0].captured_at).num_milliseconds();
        if oldest_age_ms >= SINGLE_DELAY_MS {
            return Ok(Step::Deliver(inner.pending.remove(0)));
        }
        Ok(Step::Wake(SINGLE_DELAY_MS - oldest_age_ms))
    }

    /// Move drained entries into the durable accumulation buffer;
    /// when `entering`, snapshot the anchor level first.
    async fn accumulate(
        self: &Arc<Self>,
        key: &PlayerKey,
        entries: Vec<PendingEntry>,
        entering: bool,
    ) -> Result<()> {
        let mut state = self.store.load(key).await?;

        if entering {
            state.accumulation_anchor = state.last_known_level.map(|observed| observed.level);
            state.accumulation_active = true;
            tracing::info!(%key, count = entries.len(), "burst detected, entering accumulation mode");
        }
        let anchor = state.accumulation_anchor;
        for entry in &entries {
            state.accumulation_buffer.push(PendingAnswer {
                answer: entry.answer.clone(),
                captured_at: entry.captured_at,
                level: anchor,
            });
        }
        self.store.save(key, &state).await?;

        let buffered = state.accumulation_buffer.len();
        let text = if entering {
            format!(
                "Looks like a pasted backlog: {buffered} answers collected. \
                 They will not be sent until you decide what to do with them."
            )
        } else {
            format!("{buffered} answers collected.")
        };
        self.messenger.send_message(key, &text).await?;

        for entry in entries {
            let _ = entry.slot.send(DeliveryOutcome::Accumulated);
        }

        self.schedule_idle_prompt(key, buffered);
        Ok(())
    }

    fn schedule_wake(self: &Arc<Self>, key: &PlayerKey, in_ms: i64) {
        let batch = self.batch(key);
        let generation = {
            let mut inner = batch.lock();
            inner.wake_generation += 1;
            inner.wake_generation
        };
        let this = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(in_ms.max(0) as u64)).await;
            let still_wanted = {
                let batch = this.batch(&key);
                let inner = batch.lock();
                inner.wake_generation == generation && !inner.pending.is_empty()
            };
            if still_wanted {
                this.trigger_drain(&key);
            }
        });
    }

    /// (Re)arm the accumulation idle timer: after 5 s of quiet the
    /// buffer is presented for an explicit decision, never auto-sent.
    fn schedule_idle_prompt(self: &Arc<Self>, key: &PlayerKey, buffered: usize) {
        let batch = self.batch(key);
        let generation = {
            let mut inner = batch.lock();
            inner.idle_generation += 1;
            inner.idle_generation
        };
        let this = Arc::clone(self);
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(IDLE_PROMPT_MS)).await;
            let still_current = {
                let batch = this.batch(&key);
                let inner = batch.lock();
                inner.idle_generation == generation
            };
            if !still_current {
                return;
            }
            let active = match this.store.load(&key).await {
                Ok(state) => state.accumulation_active && !state.accumulation_buffer.is_empty(),
                Err(error) => {
                    tracing::warn!(%key, %error, "idle prompt could not load state");
                    false
                }
            };
            if !active {
                return;
            }
            let text = format!(
                "{buffered} answers are waiting. Send them all, cancel them all, \
                 or list them?"
            );
            if let Err(error) = this.messenger.send_message(&key, &text).await {
                tracing::warn!(%key, %error, "idle prompt could not be sent");
            }
        });
    }

    /// Apply the player's batch decision.
    pub async fn resolve_decision(
        self: &Arc<Self>,
        key: &PlayerKey,
        decision: BatchDecision,
    ) -> Result<BatchSendReport> {
        match decision {
            BatchDecision::SendAll => self.send_accumulated(key).await,
            BatchDecision::CancelAll => self.cancel_accumulated(key).await,
            BatchDecision::List => self.list_accumulated(key).await,
            BatchDecision::RedirectToCurrent => self.redirect_accumulated(key).await,
        }
    }

    /// Bulk send. The anchor level is re-verified against a fresh read
    /// before anything is posted; each answer is then pinned to the
    /// anchor so a mid-batch level change stops the send immediately.
    pub async fn send_accumulated(&self, key: &PlayerKey) -> Result<BatchSendReport> {
        let mut state = self.store.load(key).await?;
        if !state.accumulation_active || state.accumulation_buffer.is_empty() {
            self.messenger
                .send_message(key, "There is no accumulated batch to send.")
                .await?;
            return Ok(BatchSendReport::Nothing);
        }

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

        let anchor = state.accumulation_anchor.unwrap_or(live.level);
        if live.level.id != anchor.id {
            self.store.save(key, &state).await?;
            self.messenger
                .send_message(
                    key,
                    &format!(
                        "The batch was collected on level {} but the game is now on \
                         level {}. Redirect the batch to the new level, or cancel it?",
                        anchor.number, live.level.number
                    ),
                )
                .await?;
            return Ok(BatchSendReport::Paused {
                old_level: anchor,
                new_level: live.level,
            });
        }

        let mut sent = 0;
        let mut queued = 0;
        while let Some(entry) = state.accumulation_buffer.first().cloned() {
            let result = self
                .game
                .submit_answer(
                    &state.game,
                    &entry.answer,
                    state.credentials.as_ref(),
                    &state.login,
                    state.password.as_deref(),
                    Some(anchor),
                )
                .await;
            // An engine-reported move (event 16) names no level pair;
            // a fresh read supplies the level the game is on now, so
            // the player is asked instead of the send just stopping.
            let result = match result {
                Err(
                    error @ Error::Protocol {
                        family: ProtocolFamily::LevelChanged,
                        ..
                    },
                ) => {
                    let live = self
                        .game
                        .fetch_level_state(
                            &state.game,
                            state.credentials.as_ref(),
                            &state.login,
                            state.password.as_deref(),
                        )
                        .await;
                    match live {
                        Ok(live) => {
                            Err(Error::level_changed(anchor, live.level, entry.answer.clone()))
                        }
                        Err(_) => Err(error),
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
                    state.accumulation_buffer.remove(0);
                    sent += 1;
                    self.store.save(key, &state).await?;
                }
                Err(Error::LevelChanged {
                    old_level,
                    new_level,
                    ..
                }) => {
                    let remaining = state.accumulation_buffer.len();
                    self.store.save(key, &state).await?;
                    self.messenger
                        .send_message(
                            key,
                            &format!(
                                "Level changed from {} to {} after {sent} answers were sent; \
                                 {remaining} remain buffered. Redirect them to the new level, \
                                 or cancel?",
                                old_level.number, new_level.number
                            ),
                        )
                        .await?;
                    return Ok(BatchSendReport::Interrupted {
                        sent,
                        remaining,
                        old_level,
                        new_level,
                    });
                }
                Err(error @ (Error::Network { .. } | Error::RateLimited { .. }))
                    if error.retryable() =>
                {
                    tracing::info!(%key, %error, "connectivity failure mid-batch, queueing answer");
                    let remembered = Some(anchor);
                    state.accumulation_buffer.remove(0);
                    state.answer_backlog.push(BacklogEntry::new(
                        entry.answer.clone(),
                        self.clock.now(),
                        remembered,
                    ));
                    queued += 1;
                    self.store.save(key, &state).await?;
                }
                Err(error) => {
                    let remaining = state.accumulation_buffer.len();
                    self.store.save(key, &state).await?;
                    self.messenger
                        .send_message(
                            key,
                            &format!("Batch send stopped after {sent} answers: {error}"),
                        )
                        .await?;
                    return Ok(BatchSendReport::Stopped { sent, remaining });
                }
            }
        }

        state.accumulation_active = false;
        state.accumulation_anchor = None;
        self.store.save(key, &state).await?;

        let summary = if queued == 0 {
            format!("Batch done: {sent} answers sent.")
        } else {
            format!("Batch done: {sent} answers sent, {queued} queued for retry.")
        };
        self.messenger.send_message(key, &summary).await?;
        Ok(BatchSendReport::Completed { sent, queued })
    }

    /// Re-aim the batch at the live level, then send it.
    pub async fn redirect_accumulated(&self, key: &PlayerKey) -> Result<BatchSendReport> {
        let mut state = self.store.load(key).await?;
        if !state.accumulation_active || state.accumulation_buffer.is_empty() {
            self.messenger
                .send_message(key, "There is no accumulated batch to redirect.")
                .await?;
            return Ok(BatchSendReport::Nothing);
        }
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
        state.accumulation_anchor = Some(live.level);
        self.store.save(key, &state).await?;
        self.send_accumulated(key).await
    }

    pub async fn cancel_accumulated(&self, key: &PlayerKey) -> Result<BatchSendReport> {
        let mut state = self.store.load(key).await?;
        let dropped = state.accumulation_buffer.len();
        state.accumulation_buffer.clear();
        state.accumulation_anchor = None;
        state.accumulation_active = false;
        self.store.save(key, &state).await?;
        self.messenger
            .send_message(key, &format!("Batch cancelled, {dropped} answers dropped."))
            .await?;
        Ok(BatchSendReport::Nothing)
    }

    pub async fn list_accumulated(&self, key: &PlayerKey) -> Result<BatchSendReport> {
        let state = self.store.load(key).await?;
        if state.accumulation_buffer.is_empty() {
            self.messenger
                .send_message(key, "The accumulation buffer is empty.")
                .await?;
            return Ok(BatchSendReport::Nothing);
        }
        let mut lines = vec![format!(
            "{} answers waiting:",
            state.accumulation_buffer.len()
        )];
        for (index, entry) in state.accumulation_buffer.iter().enumerate() {
            lines.push(format!("{}. {}", index + 1, entry.answer));
        }
        self.messenger.send_message(key, &lines.join("\n")).await?;
        Ok(BatchSendReport::Nothing)
    }
}
