//! End-to-end session scenarios.
//!
//! Walks a session through study, promotion, accidental input, import
//! preemption, and crash recovery against an in-memory storage backend,
//! with a manual clock driving all scheduling decisions. Timer firings are
//! delivered as scheduler messages, exactly as the message pump would.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{
    BatchWriter, Clock, CoreConfig, Item, ItemStore, ManualClock, MemoryStorage, Recovery,
    ReviewAction, SchedulerMessage, SchedulerMessageReceiver, SessionManager, Storage, StudyEvent,
};
use tempfile::TempDir;

struct Harness {
    session: Arc<SessionManager>,
    clock: Arc<ManualClock>,
    store: Arc<ItemStore>,
    storage: Arc<MemoryStorage>,
    batch: Arc<BatchWriter>,
    rx: SchedulerMessageReceiver,
    dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::at(0));
    let storage = Arc::new(MemoryStorage::new());
    let mut config = CoreConfig::default().with_data_dir(dir.path());
    // Keep write-behind buffering decisions out of the scenarios' way.
    config.batch.flush_interval_ms = 600_000;
    config.batch.size_threshold = 100;

    let store = Arc::new(ItemStore::new(
        storage.clone() as Arc<dyn Storage>,
        config.cache.clone(),
    ));
    store.load_from_storage().await.unwrap();
    let batch = Arc::new(BatchWriter::new(
        storage.clone() as Arc<dyn Storage>,
        clock.clone() as Arc<dyn Clock>,
        config.batch.clone(),
    ));
    let (session, rx) = SessionManager::new(
        config,
        clock.clone() as Arc<dyn Clock>,
        store.clone(),
        batch.clone(),
    )
    .await
    .unwrap();

    Harness {
        session,
        clock,
        store,
        storage,
        batch,
        rx,
        dir,
    }
}

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
}

async fn seed(h: &Harness, id: &str, word: &str, meaning: &str) -> Item {
    let item = Item::new(id, word, meaning, 1, h.clock.now());
    h.store.add_item(item.clone()).await;
    item
}

/// Scenario: first study of a new item, then promotion when it comes due.
#[tokio::test]
async fn first_study_then_promotion_on_due() {
    let mut h = harness().await;
    seed(&h, "000001", "apple", "苹果").await;
    let mut events = h.session.subscribe();

    h.session.start_session().await.unwrap();
    assert_eq!(h.session.queue_ids().await, vec!["000001"]);
    let current = h.session.start_current_study().await.unwrap();
    assert_eq!(current.word, "apple");

    // SwipeNext after 4 s of dwell.
    h.clock.set(4_000);
    h.session.on_gesture(ReviewAction::SwipeNext).await.unwrap();

    let updated = h.store.get_item("000001").await.unwrap();
    assert_eq!(updated.virtual_review_count, 1.0);
    assert_eq!(updated.actual_review_count, 1);
    assert!((updated.sensitivity - 2.0).abs() < 1e-9);
    assert_eq!(updated.next_review_time, at(24_000));

    // The queue drained and the idle wait was armed.
    assert!(h.session.queue_ids().await.is_empty());
    let kinds: Vec<&str> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "session.started",
            "study.started",
            "study.completed",
            "queue.empty"
        ]
    );

    // The due timer fires: the session re-verifies and rebuilds.
    h.clock.set(24_000);
    h.session
        .handle_scheduler_message(SchedulerMessage::RefreshQueue)
        .await
        .unwrap();
    assert_eq!(h.session.queue_ids().await, vec!["000001"]);
    match events.try_recv().unwrap() {
        StudyEvent::QueueRefreshed(Some(item)) => assert_eq!(item.word, "apple"),
        other => panic!("expected QueueRefreshed, got {}", other.kind()),
    }

    let again = h.session.start_current_study().await.unwrap();
    assert_eq!(again.id, "000001");

    // Drain the receiver so nothing leaks between assertions.
    while h.rx.try_recv().is_ok() {}
}

/// Scenario: ShowMeaning then SwipeNext on the same item drives the
/// documented strength progression.
#[tokio::test]
async fn show_meaning_then_swipe_next_progression() {
    let h = harness().await;
    seed(&h, "000001", "apple", "苹果").await;

    h.session.start_session().await.unwrap();
    h.session.start_current_study().await.unwrap();

    h.clock.set(3_000);
    h.session
        .on_gesture(ReviewAction::ShowMeaning)
        .await
        .unwrap();

    let after_first = h.store.get_item("000001").await.unwrap();
    assert_eq!(after_first.virtual_review_count, 0.5);
    assert_eq!(after_first.actual_review_count, 1);
    assert!((after_first.sensitivity - 1.538).abs() < 1e-3);
    // t_base = 10 000 * 1.538^0.5 with alpha = 1.
    let interval = after_first.next_review_time.timestamp_millis() - 3_000;
    assert!((interval - 12_402).abs() <= 2, "interval was {}", interval);

    // Item comes back due; study it again.
    h.clock.set(15_000 + interval.max(12_000));
    h.session
        .handle_scheduler_message(SchedulerMessage::RefreshQueue)
        .await
        .unwrap();
    h.session.start_current_study().await.unwrap();

    h.clock.advance(1_000);
    h.session.on_gesture(ReviewAction::SwipeNext).await.unwrap();

    let after_second = h.store.get_item("000001").await.unwrap();
    assert_eq!(after_second.virtual_review_count, 1.5);
    assert_eq!(after_second.actual_review_count, 2);
    assert!((after_second.sensitivity - 1.755).abs() < 1e-3);
}

/// Scenario: a double tap arriving 150 ms into the study is rejected as
/// accidental and leaves the item untouched.
#[tokio::test]
async fn accidental_double_tap_rejected() {
    let h = harness().await;
    seed(&h, "000001", "apple", "苹果").await;
    let mut events = h.session.subscribe();

    h.session.start_session().await.unwrap();
    h.clock.set(100);
    h.session.start_current_study().await.unwrap();

    // Classified gesture lands 150 ms after study start.
    h.clock.set(250);
    h.session
        .on_gesture(ReviewAction::MarkDifficult)
        .await
        .unwrap();

    let item = h.store.get_item("000001").await.unwrap();
    assert_eq!(item.actual_review_count, 0);
    assert_eq!(item.virtual_review_count, 0.0);

    let accidental = std::iter::from_fn(|| events.try_recv())
        .find(|e| matches!(e, StudyEvent::AccidentalOperation { .. }));
    match accidental {
        Some(StudyEvent::AccidentalOperation { dwell_millis, .. }) => {
            assert_eq!(dwell_millis, 150)
        }
        _ => panic!("expected AccidentalOperation"),
    }

    // The study is still live; a later gesture scores normally.
    h.clock.set(2_000);
    h.session.on_gesture(ReviewAction::SwipeNext).await.unwrap();
    assert_eq!(
        h.store.get_item("000001").await.unwrap().actual_review_count,
        1
    );
}

/// Scenario: importing during a session inserts at the head and the next
/// move_to_next switches to it, discarding the unstudied current item.
#[tokio::test]
async fn import_promotes_to_head() {
    let h = harness().await;
    seed(&h, "000001", "apple", "苹果").await;
    h.session.start_session().await.unwrap();
    h.session.start_current_study().await.unwrap();

    let imported = h.session.add_item("banana", "香蕉", 1).await.unwrap();
    assert_eq!(
        h.session.queue_ids().await,
        vec![imported.id.clone(), "000001".to_string()]
    );

    h.clock.set(1_000);
    let next = h.session.move_to_next().await.unwrap().unwrap();
    assert_eq!(next.id, imported.id);
    assert_eq!(
        h.session.start_current_study().await.unwrap().word,
        "banana"
    );
}

/// Scenario: three records hit the crash log, the first flush fails and
/// snapshots, and a restarted process recovers every write.
#[tokio::test]
async fn crash_flush_recovery() {
    let h = harness().await;
    for (id, word) in [("000001", "apple"), ("000002", "pear"), ("000003", "plum")] {
        seed(&h, id, word, "果").await;
    }

    h.session.start_session().await.unwrap();
    h.storage.set_fail_writes(true);

    for step in 0..3 {
        h.session.start_current_study().await.unwrap();
        h.clock.advance(1_000 + step * 100);
        h.session.on_gesture(ReviewAction::SwipeNext).await.unwrap();
        h.session.move_to_next().await.unwrap();
    }

    // All three records reached the crash log before any flush.
    let log = std::fs::read_to_string(h.batch.backup_log_path()).unwrap();
    assert_eq!(log.lines().count(), 3);

    // The forced end-session flush fails and leaves a snapshot behind.
    h.session.end_session().await.unwrap();
    assert!(h.batch.snapshot_path().exists());
    assert_eq!(h.storage.item_count().await, 0);

    // Process restart: storage is healthy, recovery replays the snapshot.
    h.storage.set_fail_writes(false);
    let recovery = Recovery::new(
        h.storage.clone() as Arc<dyn Storage>,
        h.clock.clone() as Arc<dyn Clock>,
        h.dir.path().to_path_buf(),
    );
    let report = recovery.run().await.unwrap();

    assert_eq!(report.updates_applied, 3);
    assert_eq!(report.records_applied, 3);
    assert_eq!(report.backup_lines_scanned, 3);
    assert_eq!(report.backup_records_matched, 3);
    assert_eq!(report.parse_errors, 0);
    assert!(!h.batch.snapshot_path().exists());

    // No record or update was lost.
    assert_eq!(h.storage.item_count().await, 3);
    assert_eq!(h.storage.record_count().await, 3);
    for item in h.storage.load_all_items().await.unwrap() {
        assert_eq!(item.actual_review_count, 1);
    }

    // Running recovery again with nothing pending changes nothing.
    let empty_report = recovery.run().await.unwrap();
    assert_eq!(empty_report.updates_applied, 0);
    assert_eq!(empty_report.records_applied, 0);
    assert_eq!(empty_report.total_items, 3);
}

/// Real timers: an item studied with a short interval is promoted through
/// the scheduler outbox and lands back at the queue head.
#[tokio::test]
async fn real_timer_promotion_round_trip() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(recall_core::SystemClock);
    let storage = Arc::new(MemoryStorage::new());
    let mut config = CoreConfig::default().with_data_dir(dir.path());
    config.batch.flush_interval_ms = 600_000;
    config.batch.size_threshold = 100;
    // Shrink the interval floor so the due timer fires within the test.
    config.review.base_interval_ms = 50;
    config.review.min_interval_ms = 50;
    config.review.accidental_threshold_ms = 0;

    let store = Arc::new(ItemStore::new(
        storage.clone() as Arc<dyn Storage>,
        config.cache.clone(),
    ));
    let batch = Arc::new(BatchWriter::new(
        storage.clone() as Arc<dyn Storage>,
        clock.clone() as Arc<dyn Clock>,
        config.batch.clone(),
    ));
    let (session, rx) = SessionManager::new(config, clock.clone(), store.clone(), batch)
        .await
        .unwrap();
    session.spawn_pump(rx);

    store
        .add_item(Item::new("000001", "apple", "苹果", 1, clock.now()))
        .await;
    session.start_session().await.unwrap();
    session.start_current_study().await.unwrap();
    let mut events = session.subscribe();
    session.on_gesture(ReviewAction::SwipeNext).await.unwrap();

    // Wait for the promotion to come back through the pump.
    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(5);
    loop {
        let remaining = deadline - tokio::time::Instant::now();
        let event = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("promotion should fire before the deadline")
            .expect("bus open");
        if let StudyEvent::ItemPromoted(item) = event {
            assert_eq!(item.id, "000001");
            break;
        }
    }
    assert_eq!(session.queue_ids().await, vec!["000001"]);

    session.end_session().await.unwrap();
}
