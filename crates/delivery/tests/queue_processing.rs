mod common;

use std::sync::Arc;

use tokio::time::Duration;

use questline_clock::ManualClock;
use questline_core::{BacklogEntry, Error, Level, ProtocolFamily, QueueConflict};
use questline_delivery::QueueProcessor;

use common::{test_key, test_state, InMemoryStore, RecordingMessenger, ScriptedGame, SubmitScript};

fn processor(
    store: &Arc<InMemoryStore>,
    messenger: &Arc<RecordingMessenger>,
    game: &Arc<ScriptedGame>,
) -> QueueProcessor {
    QueueProcessor::with_pacing(
        store.clone(),
        messenger.clone(),
        game.clone(),
        Arc::new(ManualClock::new()),
        Duration::ZERO,
        Duration::ZERO,
    )
}

fn backlog_entry(answer: &str, level: Option<Level>) -> BacklogEntry {
    BacklogEntry::new(answer, chrono::Utc::now(), level)
}

#[tokio::test]
async fn test_replay_delivers_whole_backlog() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    state.answer_backlog.push(backlog_entry("AAA", Some(level)));
    state.answer_backlog.push(backlog_entry("BBB", Some(level)));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert!(report.ran);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.remaining, 0);
    assert!(!report.conflict);
    assert!(store.get(&test_key()).answer_backlog.is_empty());

    // Each replayed item is pinned to its remembered level.
    let submits = game.submits.lock().clone();
    assert_eq!(submits.len(), 2);
    assert_eq!(submits[0], ("AAA".to_string(), Some(level)));
    assert_eq!(submits[1], ("BBB".to_string(), Some(level)));

    assert_eq!(
        messenger.last_update_text().as_deref(),
        Some("All 2 queued answers were delivered.")
    );
}

#[tokio::test]
async fn test_level_drift_raises_conflict_before_anything_is_dequeued() {
    let mut state = test_state(Some(Level::new(1, 1)));
    state
        .answer_backlog
        .push(backlog_entry("AAA", Some(Level::new(1, 1))));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(Level::new(2, 3));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert!(report.conflict);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(game.submit_count(), 0);

    let saved = store.get(&test_key());
    assert_eq!(saved.answer_backlog.len(), 1);
    assert_eq!(
        saved.queue_conflict(),
        Some(&QueueConflict {
            old_level_number: 1,
            new_level_number: 3,
            queue_size: 1,
        })
    );
    assert!(messenger.sent_texts()[0].contains("aimed at level 1"));
}

#[tokio::test]
async fn test_unresolved_conflict_pauses_the_replay() {
    let mut state = test_state(Some(Level::new(1, 1)));
    state
        .answer_backlog
        .push(backlog_entry("AAA", Some(Level::new(1, 1))));
    state.set_queue_conflict(QueueConflict {
        old_level_number: 1,
        new_level_number: 2,
        queue_size: 1,
    });

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(Level::new(1, 1));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert!(!report.ran);
    assert!(report.conflict);
    assert_eq!(game.submit_count(), 0);
    assert!(messenger.sent_texts()[0].contains("paused"));
}

#[tokio::test]
async fn test_stale_level_failures_are_skipped_silently() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    state.answer_backlog.push(backlog_entry("AAA", Some(level)));
    state.answer_backlog.push(backlog_entry("BBB", Some(level)));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);
    game.script(SubmitScript::Fail(Error::protocol(
        "17",
        "level already passed",
        ProtocolFamily::LevelPassed,
        false,
    )));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 0);
}

#[tokio::test]
async fn test_item_is_dropped_on_its_third_failure() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    let mut entry = backlog_entry("AAA", Some(level));
    entry.failed_attempts = 2;
    state.answer_backlog.push(entry);

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);
    game.script(SubmitScript::Fail(Error::protocol(
        "5",
        "player banned",
        ProtocolFamily::Other,
        false,
    )));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.remaining, 0);
    assert!(store.get(&test_key()).answer_backlog.is_empty());
}

#[tokio::test]
async fn test_failing_item_does_not_block_the_rest() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    state.answer_backlog.push(backlog_entry("AAA", Some(level)));
    state.answer_backlog.push(backlog_entry("BBB", Some(level)));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);
    game.script(SubmitScript::Fail(Error::network(false, "404")));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.remaining, 1);

    let saved = store.get(&test_key());
    assert_eq!(saved.answer_backlog.len(), 1);
    assert_eq!(saved.answer_backlog[0].answer, "AAA");
    assert_eq!(saved.answer_backlog[0].failed_attempts, 1);
    assert!(saved.answer_backlog[0].last_error.is_some());
}

#[tokio::test]
async fn test_auth_failure_clears_credentials_and_retries_the_item_once() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    state.answer_backlog.push(backlog_entry("AAA", Some(level)));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);
    game.script(SubmitScript::Fail(Error::auth_required()));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(game.submit_count(), 2);
    // The stale tokens were cleared so the retry re-authenticates.
    assert!(store.get(&test_key()).credentials.is_none());
}

#[tokio::test]
async fn test_second_auth_failure_counts_as_an_ordinary_failure() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    state.answer_backlog.push(backlog_entry("AAA", Some(level)));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);
    game.script(SubmitScript::Fail(Error::auth_required()));
    game.script(SubmitScript::Fail(Error::auth_required()));

    let report = processor(&store, &messenger, &game)
        .process_backlog(&test_key())
        .await
        .unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(game.submit_count(), 2);
    assert_eq!(store.get(&test_key()).answer_backlog[0].failed_attempts, 1);
}

#[tokio::test]
async fn test_concurrent_replay_is_refused_by_the_guard() {
    let level = Level::new(1, 1);
    let mut state = test_state(Some(level));
    state.answer_backlog.push(backlog_entry("AAA", Some(level)));

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(level);
    *game.submit_delay.lock() = Duration::from_millis(50);

    let processor = Arc::new(processor(&store, &messenger, &game));
    let key = test_key();
    let (first, second) = tokio::join!(
        processor.process_backlog(&key),
        processor.process_backlog(&key),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.ran != second.ran);
    assert_eq!(first.delivered + second.delivered, 1);
    assert_eq!(game.submit_count(), 1);
}

#[tokio::test]
async fn test_resolving_a_conflict_toward_the_new_level_replays_unpinned() {
    let mut state = test_state(Some(Level::new(1, 1)));
    state
        .answer_backlog
        .push(backlog_entry("AAA", Some(Level::new(1, 1))));
    state.set_queue_conflict(QueueConflict {
        old_level_number: 1,
        new_level_number: 3,
        queue_size: 1,
    });

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(Level::new(2, 3));

    let report = processor(&store, &messenger, &game)
        .resolve_conflict(&test_key(), true)
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
    let submits = game.submits.lock().clone();
    assert_eq!(submits, vec![("AAA".to_string(), None)]);

    let saved = store.get(&test_key());
    assert!(saved.answer_backlog.is_empty());
    assert!(!saved.has_conflict());
}

#[tokio::test]
async fn test_cancelling_a_conflict_drops_the_queue() {
    let mut state = test_state(Some(Level::new(1, 1)));
    state
        .answer_backlog
        .push(backlog_entry("AAA", Some(Level::new(1, 1))));
    state
        .answer_backlog
        .push(backlog_entry("BBB", Some(Level::new(1, 1))));
    state.set_queue_conflict(QueueConflict {
        old_level_number: 1,
        new_level_number: 3,
        queue_size: 2,
    });

    let store = InMemoryStore::with_state(state);
    let messenger = RecordingMessenger::new();
    let game = ScriptedGame::new(Level::new(2, 3));

    let report = processor(&store, &messenger, &game)
        .resolve_conflict(&test_key(), false)
        .await
        .unwrap();

    assert_eq!(report.dropped, 2);
    assert_eq!(game.submit_count(), 0);

    let saved = store.get(&test_key());
    assert!(saved.answer_backlog.is_empty());
    assert!(!saved.has_conflict());
    assert!(messenger.sent_texts()[0].contains("Queue cancelled"));
}
