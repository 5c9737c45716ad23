//! In-memory collaborators for delivery tests, implementing the ports
//! the production adapters implement.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use questline_core::{
    Credentials, Error, GameRef, Level, LevelState, MessageId, PlayerDeliveryState, PlayerKey,
    Platform, Result, SubmitOutcome,
};
use questline_ports::{GameApi, Messenger, PlayerStore};

pub fn test_key() -> PlayerKey {
    PlayerKey::new(Platform::Telegram, 42)
}

pub fn test_state(last_level: Option<Level>) -> PlayerDeliveryState {
    let mut state = PlayerDeliveryState::new(
        Platform::Telegram,
        42,
        "alice",
        GameRef::new("demo.example.com", 100),
    );
    state.password = Some("secret".into());
    state.credentials = Some(Credentials::new(
        vec![("stoken".into(), "valid".into())],
        Utc::now(),
    ));
    if let Some(level) = last_level {
        state.observe_level(level, Utc::now());
    }
    state
}

pub struct InMemoryStore {
    states: Mutex<HashMap<PlayerKey, PlayerDeliveryState>>,
}

impl InMemoryStore {
    pub fn with_state(state: PlayerDeliveryState) -> Arc<Self> {
        let mut states = HashMap::new();
        states.insert(state.key(), state);
        Arc::new(InMemoryStore {
            states: Mutex::new(states),
        })
    }

    pub fn get(&self, key: &PlayerKey) -> PlayerDeliveryState {
        self.states.lock().get(key).expect("player state").clone()
    }
}

#[async_trait]
impl PlayerStore for InMemoryStore {
    async fn load(&self, key: &PlayerKey) -> Result<PlayerDeliveryState> {
        self.states
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::internal(format!("unknown player {key}")))
    }

    async fn save(&self, key: &PlayerKey, state: &PlayerDeliveryState) -> Result<()> {
        self.states.lock().insert(key.clone(), state.clone());
        Ok(())
    }
}

pub struct RecordingMessenger {
    pub sent: Mutex<Vec<String>>,
    pub updates: Mutex<Vec<(Option<MessageId>, String)>>,
    next_id: AtomicI64,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingMessenger {
            sent: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        })
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn last_update_text(&self) -> Option<String> {
        self.updates.lock().last().map(|(_, text)| text.clone())
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, _key: &PlayerKey, text: &str) -> Result<MessageId> {
        self.sent.lock().push(text.to_string());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_or_update(
        &self,
        _key: &PlayerKey,
        text: &str,
        message_id: Option<MessageId>,
    ) -> Result<MessageId> {
        self.updates.lock().push((message_id, text.to_string()));
        Ok(message_id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst)))
    }
}

pub enum SubmitScript {
    Accept,
    Fail(Error),
}

/// Scripted game server: `fetch_level_state` always reports the
/// configured live level, `submit_answer` consumes scripted results
/// (defaulting to acceptance) and records every call.
pub struct ScriptedGame {
    live: Mutex<Level>,
    scripts: Mutex<VecDeque<SubmitScript>>,
    fetch_scripts: Mutex<VecDeque<Level>>,
    pub submits: Mutex<Vec<(String, Option<Level>)>>,
    pub fetches: AtomicU32,
    pub submit_delay: Mutex<std::time::Duration>,
}

impl ScriptedGame {
    pub fn new(live: Level) -> Arc<Self> {
        Arc::new(ScriptedGame {
            live: Mutex::new(live),
            scripts: Mutex::new(VecDeque::new()),
            fetch_scripts: Mutex::new(VecDeque::new()),
            submits: Mutex::new(Vec::new()),
            fetches: AtomicU32::new(0),
            submit_delay: Mutex::new(std::time::Duration::ZERO),
        })
    }

    pub fn set_live(&self, level: Level) {
        *self.live.lock() = level;
    }

    pub fn script(&self, result: SubmitScript) {
        self.scripts.lock().push_back(result);
    }

    /// Queue a level for the next `fetch_level_state` call; once the
    /// queue is drained fetches fall back to the configured live level.
    pub fn script_fetch(&self, level: Level) {
        self.fetch_scripts.lock().push_back(level);
    }

    pub fn submit_count(&self) -> usize {
        self.submits.lock().len()
    }
}

#[async_trait]
impl GameApi for ScriptedGame {
    async fn authenticate(
        &self,
        _domain: &str,
        _login: &str,
        _password: &str,
    ) -> Result<Credentials> {
        Ok(Credentials::new(
            vec![("stoken".into(), "scripted".into())],
            Utc::now(),
        ))
    }

    async fn fetch_level_state(
        &self,
        _game: &GameRef,
        _credentials: Option<&Credentials>,
        _login: &str,
        _password: Option<&str>,
    ) -> Result<LevelState> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let level = self
            .fetch_scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.live.lock());
        Ok(LevelState {
            level,
            is_passed: false,
            dismissed: false,
            block_remaining_secs: None,
            sectors_required: None,
            sectors_passed: None,
            refreshed_credentials: None,
        })
    }

    async fn submit_answer(
        &self,
        _game: &GameRef,
        answer: &str,
        _credentials: Option<&Credentials>,
        _login: &str,
        _password: Option<&str>,
        expected_level: Option<Level>,
    ) -> Result<SubmitOutcome> {
        let delay = *self.submit_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.submits
            .lock()
            .push((answer.to_string(), expected_level));

        match self.scripts.lock().pop_front() {
            Some(SubmitScript::Fail(error)) => Err(error),
            Some(SubmitScript::Accept) | None => {
                let live = *self.live.lock();
                Ok(SubmitOutcome {
                    level: live,
                    verdict: Some(true),
                    level_passed: false,
                    text: format!("Answer \"{answer}\" is correct"),
                    refreshed_credentials: None,
                })
            }
        }
    }
}
