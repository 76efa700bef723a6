//! Test utilities and fixtures for mnema-core tests.
//!
//! This module provides:
//! - Re-exports of mockall-generated mocks
//! - A settable clock, an in-memory storage with failure injection, and a
//!   notifier that records every callback
//! - Reusable item/record fixtures

pub mod fixtures;

use crate::domain::{
    Item, ReviewAction, ReviewRecord, SessionSummary, StorageError, StorageResult,
};
use crate::ports::{Clock, Notifier, Storage};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub use crate::ports::MockStorage;
pub use fixtures::{item_due_at, record_at};

/// Clock whose time only moves when a test says so.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_millis: AtomicI64,
}

impl ManualClock {
    pub fn start_at(millis: i64) -> Self {
        Self {
            now_millis: AtomicI64::new(millis),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        self.now_millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, delta: i64) {
        self.now_millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// In-memory [`Storage`] with failure injection for the write paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, Item>>,
    records: Mutex<HashMap<String, Vec<ReviewRecord>>>,
    fail_remaining: AtomicUsize,
    fatal: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` write operations with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every write operation fatally until cleared.
    pub fn fail_fatal(&self, on: bool) {
        self.fatal.store(on, Ordering::SeqCst);
    }

    pub fn put_blocking(&self, item: Item) {
        self.items
            .lock()
            .expect("items mutex poisoned")
            .insert(item.id.clone(), item);
    }

    pub fn append_blocking(&self, record: ReviewRecord) {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .entry(record.item_id.clone())
            .or_default()
            .push(record);
    }

    pub fn get_item_blocking(&self, id: &str) -> Option<Item> {
        self.items
            .lock()
            .expect("items mutex poisoned")
            .get(id)
            .cloned()
    }

    pub fn item_count(&self) -> usize {
        self.items.lock().expect("items mutex poisoned").len()
    }

    pub fn record_count(&self, id: &str) -> usize {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .get(id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn check_write(&self) -> StorageResult<()> {
        if self.fatal.load(Ordering::SeqCst) {
            return Err(StorageError::Fatal("injected fatal failure".to_string()));
        }
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Transient(
                "injected transient failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_item(&self, item: &Item) -> StorageResult<()> {
        self.check_write()?;
        self.put_blocking(item.clone());
        Ok(())
    }

    async fn append_record(&self, _item_id: &str, record: &ReviewRecord) -> StorageResult<()> {
        self.check_write()?;
        self.append_blocking(record.clone());
        Ok(())
    }

    async fn load_all_items(&self) -> StorageResult<Vec<Item>> {
        Ok(self
            .items
            .lock()
            .expect("items mutex poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn load_history(&self, item_id: &str) -> StorageResult<Vec<ReviewRecord>> {
        Ok(self
            .records
            .lock()
            .expect("records mutex poisoned")
            .get(item_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Every callback the core fired, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifierEvent {
    SessionStarted(String),
    SessionEnded(SessionSummary),
    SessionPaused(String),
    SessionResumed(String),
    StudyStarted(String),
    StudyCompleted {
        item_id: String,
        action: ReviewAction,
        next_review_millis: i64,
    },
    QueueEmpty,
    QueueRefreshed(Option<String>),
    ItemAddedToQueue(String),
    AccidentalOperation {
        dwell_millis: i64,
        description: String,
    },
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifierEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifierEvent> {
        self.events.lock().expect("events mutex poisoned").clone()
    }

    pub fn contains(&self, event: &NotifierEvent) -> bool {
        self.events().iter().any(|e| e == event)
    }

    pub fn count_queue_empty(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, NotifierEvent::QueueEmpty))
            .count()
    }

    fn push(&self, event: NotifierEvent) {
        self.events.lock().expect("events mutex poisoned").push(event);
    }
}

impl Notifier for RecordingNotifier {
    fn session_started(&self, session_id: &str) {
        self.push(NotifierEvent::SessionStarted(session_id.to_string()));
    }

    fn session_ended(&self, result: &SessionSummary) {
        self.push(NotifierEvent::SessionEnded(result.clone()));
    }

    fn session_paused(&self, session_id: &str) {
        self.push(NotifierEvent::SessionPaused(session_id.to_string()));
    }

    fn session_resumed(&self, session_id: &str) {
        self.push(NotifierEvent::SessionResumed(session_id.to_string()));
    }

    fn study_started(&self, item: &Item) {
        self.push(NotifierEvent::StudyStarted(item.id.clone()));
    }

    fn study_completed(&self, _item: &Item, record: &ReviewRecord, updated: &Item) {
        self.push(NotifierEvent::StudyCompleted {
            item_id: updated.id.clone(),
            action: record.action,
            next_review_millis: updated.next_review_time.timestamp_millis(),
        });
    }

    fn queue_empty(&self) {
        self.push(NotifierEvent::QueueEmpty);
    }

    fn queue_refreshed(&self, item: Option<&Item>) {
        self.push(NotifierEvent::QueueRefreshed(item.map(|i| i.id.clone())));
    }

    fn item_added_to_queue(&self, item: &Item) {
        self.push(NotifierEvent::ItemAddedToQueue(item.id.clone()));
    }

    fn accidental_operation(&self, dwell_millis: i64, description: &str) {
        self.push(NotifierEvent::AccidentalOperation {
            dwell_millis,
            description: description.to_string(),
        });
    }
}
