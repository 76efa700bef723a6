use super::*;
use crate::testing::{item_due_at, ManualClock, MemoryStorage, NotifierEvent, RecordingNotifier};
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    session: SessionManager,
    storage: Arc<MemoryStorage>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

async fn harness_with(items: Vec<Item>) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = CoreConfig::default().with_data_dir(dir.path());
    let storage = Arc::new(MemoryStorage::new());
    for item in items {
        storage.put_blocking(item);
    }
    let clock = Arc::new(ManualClock::start_at(0));
    let notifier = Arc::new(RecordingNotifier::new());

    let store = Arc::new(
        ItemStore::load(storage.clone() as Arc<dyn crate::ports::Storage>, &config)
            .await
            .unwrap(),
    );
    let batch = Arc::new(BatchWriter::new(
        storage.clone() as Arc<dyn crate::ports::Storage>,
        clock.clone() as Arc<dyn Clock>,
        &config,
    ));
    let session = SessionManager::new(
        store,
        batch,
        clock.clone() as Arc<dyn Clock>,
        notifier.clone() as Arc<dyn Notifier>,
        config,
    );
    Harness {
        session,
        storage,
        clock,
        notifier,
        _dir: dir,
    }
}

fn apple() -> Item {
    let mut item = item_due_at("000001", 0);
    item.word = "apple".to_string();
    item.meaning = "苹果".to_string();
    item
}

/// Let spawned timer tasks run after a paused-time advance.
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn first_study_of_a_new_item() {
    let mut h = harness_with(vec![apple()]).await;

    h.session.start_session().unwrap();
    assert_eq!(h.session.queue().ids(), ["000001"]);

    let item = h.session.start_current_study().unwrap();
    assert_eq!(item.word, "apple");

    h.clock.set_millis(4_000);
    let updated = h
        .session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap()
        .expect("study scored");

    assert_eq!(updated.virtual_review_count, 1.0);
    assert_eq!(updated.actual_review_count, 1);
    assert!((updated.sensitivity - 2.0).abs() < 1e-12);
    assert_eq!(updated.next_review_time.timestamp_millis(), 24_000);

    // Queue drained: idle wait armed, QueueEmpty fired.
    assert!(h.session.queue().is_empty());
    assert!(h.session.scheduler().has_idle_wait());
    assert!(h.notifier.contains(&NotifierEvent::QueueEmpty));

    // Write-behind: nothing durable yet, record captured in the crash log.
    assert_eq!(h.storage.item_count(), 1);
    assert_eq!(h.storage.get_item_blocking("000001").unwrap().actual_review_count, 0);
}

#[tokio::test(start_paused = true)]
async fn promotion_when_the_idle_wait_fires() {
    let mut h = harness_with(vec![apple()]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();
    h.clock.set_millis(4_000);
    h.session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();

    // Idle wait was armed for T=24_000, i.e. 20 s from the gesture.
    tokio::time::advance(Duration::from_millis(20_000)).await;
    settle().await;
    h.clock.set_millis(24_000);

    // Both the per-item timer and the idle wait fire at T=24_000; the
    // second delivery deduplicates against the queue.
    let handled = h.session.drain_scheduler_events().await.unwrap();
    assert!(handled >= 1);

    // Queue rebuilt and the study restarted immediately.
    assert_eq!(h.session.queue().ids(), ["000001"]);
    assert!(h
        .notifier
        .contains(&NotifierEvent::QueueRefreshed(Some("000001".to_string()))));
    let started: Vec<_> = h
        .notifier
        .events()
        .into_iter()
        .filter(|e| matches!(e, NotifierEvent::StudyStarted(_)))
        .collect();
    assert_eq!(started.len(), 2, "initial study plus the refreshed one");
}

#[tokio::test(start_paused = true)]
async fn per_item_timer_promotes_to_queue_head() {
    let slow = item_due_at("000002", 0);
    let mut h = harness_with(vec![apple(), slow]).await;

    h.session.start_session().unwrap();
    assert_eq!(h.session.queue().ids(), ["000001", "000002"]);

    h.session.start_current_study().unwrap();
    h.clock.set_millis(4_000);
    h.session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();

    // apple is out of the queue, waiting on its timer for T=24_000.
    assert_eq!(h.session.queue().ids(), ["000002"]);
    assert!(h.session.scheduler().has_timer("000001"));

    tokio::time::advance(Duration::from_millis(20_000)).await;
    settle().await;
    h.clock.set_millis(24_000);
    h.session.drain_scheduler_events().await.unwrap();

    // Promoted to position 0, ahead of the still-pending item.
    assert_eq!(h.session.queue().ids(), ["000001", "000002"]);
    assert!(h
        .notifier
        .contains(&NotifierEvent::ItemAddedToQueue("000001".to_string())));
}

#[tokio::test(start_paused = true)]
async fn accidental_gesture_changes_nothing() {
    let mut h = harness_with(vec![apple()]).await;

    h.session.start_session().unwrap();
    h.clock.set_millis(100);
    h.session.start_current_study().unwrap();

    // Double-tap classified 150 ms after the study started.
    h.clock.set_millis(250);
    let outcome = h
        .session
        .on_gesture(ReviewAction::MarkDifficult)
        .await
        .unwrap();
    assert!(outcome.is_none());

    let events = h.notifier.events();
    assert!(events.iter().any(|e| matches!(
        e,
        NotifierEvent::AccidentalOperation { dwell_millis: 150, .. }
    )));

    // Item untouched, study still running: a later gesture scores.
    let item = h.session.store.get_item("000001").unwrap();
    assert_eq!(item.actual_review_count, 0);

    h.clock.set_millis(100 + 200);
    let outcome = h
        .session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();
    assert!(outcome.is_some(), "dwell of exactly 200 ms is accepted");
}

#[tokio::test(start_paused = true)]
async fn imported_item_preempts_via_the_head() {
    let other = item_due_at("000002", 0);
    let mut h = harness_with(vec![apple(), other]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();

    // Import mid-study: lands at position 0, cursor keeps its item.
    h.clock.set_millis(1_000);
    let imported = h.session.add_item("pear", "梨", 1).await.unwrap();
    assert_eq!(imported.id, "000003");
    assert_eq!(h.session.queue().head(), Some("000003"));
    assert_eq!(h.session.queue().current(), Some("000001"));

    // The next move discards the unfinished study and snaps to the head.
    let next = h.session.move_to_next().unwrap().unwrap();
    assert_eq!(next.id, "000003");
    assert!(h
        .notifier
        .contains(&NotifierEvent::ItemAddedToQueue("000003".to_string())));
}

#[tokio::test(start_paused = true)]
async fn move_to_next_stays_put_after_a_completed_study() {
    let b = item_due_at("000002", 0);
    let c = item_due_at("000003", 0);
    let mut h = harness_with(vec![apple(), b, c]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();
    h.clock.set_millis(1_000);
    h.session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();

    // The removal already advanced the cursor to the successor.
    let next = h.session.move_to_next().unwrap().unwrap();
    assert_eq!(next.id, "000002");
}

#[tokio::test(start_paused = true)]
async fn move_to_next_skips_and_wraps_during_a_study() {
    let b = item_due_at("000002", 0);
    let mut h = harness_with(vec![apple(), b]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();

    let next = h.session.move_to_next().unwrap().unwrap();
    assert_eq!(next.id, "000002", "skipped the unfinished study");

    h.session.start_current_study().unwrap();
    let wrapped = h.session.move_to_next().unwrap().unwrap();
    assert_eq!(wrapped.id, "000001", "fell off the end and wrapped");
}

#[tokio::test(start_paused = true)]
async fn gesture_without_a_study_is_rejected() {
    let mut h = harness_with(vec![apple()]).await;
    h.session.start_session().unwrap();

    let err = h
        .session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoCurrentItem));

    // Completing a study clears it; the same gesture cannot score twice.
    h.session.start_current_study().unwrap();
    h.clock.set_millis(1_000);
    h.session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();
    let err = h
        .session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NoCurrentItem));
}

#[tokio::test(start_paused = true)]
async fn operations_require_a_session() {
    let mut h = harness_with(vec![apple()]).await;

    assert!(matches!(
        h.session.start_current_study(),
        Err(CoreError::NoActiveSession)
    ));
    assert!(matches!(
        h.session.move_to_next(),
        Err(CoreError::NoActiveSession)
    ));

    h.session.start_session().unwrap();
    assert!(matches!(
        h.session.start_session(),
        Err(CoreError::SessionAlreadyActive)
    ));
}

#[tokio::test(start_paused = true)]
async fn pause_discards_gestures_and_resume_repromotes() {
    let mut h = harness_with(vec![apple()]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();
    h.session.pause_session().unwrap();

    h.clock.set_millis(5_000);
    let outcome = h
        .session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();
    assert!(outcome.is_none(), "paused sessions discard gestures");
    assert_eq!(h.session.store.get_item("000001").unwrap().actual_review_count, 0);

    h.session.resume_session().unwrap();
    assert_eq!(h.session.state(), SessionState::Active);
    assert!(h
        .notifier
        .events()
        .iter()
        .any(|e| matches!(e, NotifierEvent::SessionResumed(_))));
}

#[tokio::test(start_paused = true)]
async fn end_session_flushes_cancels_and_seals() {
    let mut h = harness_with(vec![apple()]).await;

    let session_id = h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();
    h.clock.set_millis(4_000);
    h.session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();

    h.clock.set_millis(10_000);
    let summary = h.session.end_session().await.unwrap();
    assert_eq!(summary.session_id, session_id);
    assert_eq!(summary.items_studied, 1);
    assert_eq!(summary.total_actions, 1);
    assert_eq!(summary.duration_ms, 10_000);

    // Flushed on the way out; timers gone.
    assert_eq!(h.storage.get_item_blocking("000001").unwrap().actual_review_count, 1);
    assert_eq!(h.storage.record_count("000001"), 1);
    assert_eq!(h.session.scheduler().pending_timer_count(), 0);
    assert!(!h.session.scheduler().has_idle_wait());

    assert!(matches!(
        h.session.on_gesture(ReviewAction::SwipeNext).await,
        Err(CoreError::NoActiveSession)
    ));
    assert!(matches!(
        h.session.end_session().await,
        Err(CoreError::NoActiveSession)
    ));
}

#[tokio::test(start_paused = true)]
async fn touch_events_drive_a_full_study() {
    let mut h = harness_with(vec![apple()]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();

    // A single tap at T=1000, confirmed once the double-tap window closes.
    h.clock.set_millis(1_000);
    h.session
        .on_touch(&TouchEvent::Down {
            x: 10.0,
            y: 10.0,
            at: h.clock.now(),
        })
        .await
        .unwrap();
    h.clock.set_millis(1_050);
    let mid = h
        .session
        .on_touch(&TouchEvent::Up {
            x: 10.0,
            y: 10.0,
            at: h.clock.now(),
        })
        .await
        .unwrap();
    assert!(mid.is_none(), "tap still inside the double-tap window");

    h.clock.set_millis(1_400);
    let updated = h.session.flush_gesture().await.unwrap().expect("scored");
    assert_eq!(updated.virtual_review_count, 0.5, "ShowMeaning applied");
    assert_eq!(updated.actual_review_count, 1);
}

#[tokio::test(start_paused = true)]
async fn session_with_nothing_due_arms_the_idle_wait() {
    let later = item_due_at("000001", 60_000);
    let mut h = harness_with(vec![later]).await;

    h.session.start_session().unwrap();
    assert!(h.session.queue().is_empty());
    assert!(h.session.scheduler().has_idle_wait());
    assert_eq!(h.notifier.count_queue_empty(), 1);

    tokio::time::advance(Duration::from_millis(60_000)).await;
    settle().await;
    h.clock.set_millis(60_000);
    h.session.drain_scheduler_events().await.unwrap();
    assert_eq!(h.session.queue().ids(), ["000001"]);
}

#[tokio::test(start_paused = true)]
async fn foreground_recheck_promotes_due_items() {
    let mut h = harness_with(vec![apple()]).await;

    h.session.start_session().unwrap();
    h.session.start_current_study().unwrap();
    h.clock.set_millis(4_000);
    h.session
        .on_gesture(ReviewAction::SwipeNext)
        .await
        .unwrap();
    assert!(h.session.queue().is_empty());

    // Returned from background well past the due time; no timer needed.
    h.clock.set_millis(30_000);
    h.session.on_app_foreground();
    assert_eq!(h.session.queue().ids(), ["000001"]);
}
