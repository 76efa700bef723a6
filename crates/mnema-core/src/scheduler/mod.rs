//! Due-time scheduling.
//!
//! The scheduler owns item IDs and timers, nothing else. When a timer
//! fires it posts a message into the outbox channel; the session drains
//! that channel on its own serial path and makes the actual promotion
//! decision there, re-checking the item's current due time. That keeps
//! every mutation of queue and store on the session owner and absorbs
//! timer drift.

use crate::ports::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A per-item timer fired; the item may now be due.
    Promote(String),
    /// The idle-wait timer fired; rebuild the queue from the store.
    RefreshQueue,
    /// Periodic safety net; sweep the store for anything due.
    DueCheck,
}

pub struct DueScheduler {
    clock: Arc<dyn Clock>,
    tx: UnboundedSender<SchedulerEvent>,
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    idle_slot: Arc<Mutex<Option<JoinHandle<()>>>>,
    periodic_slot: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DueScheduler {
    /// Create the scheduler and hand the outbox receiver to the owner.
    pub fn new(clock: Arc<dyn Clock>) -> (Self, UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                clock,
                tx,
                timers: Arc::new(Mutex::new(HashMap::new())),
                idle_slot: Arc::new(Mutex::new(None)),
                periodic_slot: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// Schedule a one-shot promotion timer for an item. At most one timer
    /// per ID: re-registering replaces the previous one.
    pub fn register(&self, item_id: &str, due_at: DateTime<Utc>) {
        let delay = wait_duration(due_at, self.clock.now());
        let id = item_id.to_string();
        let tx = self.tx.clone();
        let timers = Arc::clone(&self.timers);
        debug!(item = %id, ?delay, "promotion timer registered");

        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Drop our own map entry; a finished handle left behind by the
            // insert racing a zero-delay fire is harmless.
            timers.lock().expect("timer map poisoned").remove(&task_id);
            let _ = tx.send(SchedulerEvent::Promote(task_id));
        });

        let mut timers = self.timers.lock().expect("timer map poisoned");
        if let Some(old) = timers.insert(id, handle) {
            old.abort();
        }
    }

    /// Drop an item's pending timer, if any.
    pub fn cancel(&self, item_id: &str) {
        if let Some(handle) = self
            .timers
            .lock()
            .expect("timer map poisoned")
            .remove(item_id)
        {
            handle.abort();
        }
    }

    /// Arm the idle-wait timer for the next future due instant. A single
    /// slot: any re-arm replaces the previous wait.
    pub fn start_idle_wait(&self, due_at: DateTime<Utc>) {
        let delay = wait_duration(due_at, self.clock.now());
        let tx = self.tx.clone();
        let slot = Arc::clone(&self.idle_slot);
        debug!(?delay, "idle-wait timer armed");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            slot.lock().expect("idle slot poisoned").take();
            let _ = tx.send(SchedulerEvent::RefreshQueue);
        });

        if let Some(old) = self
            .idle_slot
            .lock()
            .expect("idle slot poisoned")
            .replace(handle)
        {
            old.abort();
        }
    }

    /// Start the recurring due sweep. A single slot: restarting replaces
    /// the previous ticker.
    pub fn start_periodic_check(&self, period_ms: u64) {
        let tx = self.tx.clone();
        let period = std::time::Duration::from_millis(period_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if tx.send(SchedulerEvent::DueCheck).is_err() {
                    break;
                }
            }
        });

        if let Some(old) = self
            .periodic_slot
            .lock()
            .expect("periodic slot poisoned")
            .replace(handle)
        {
            old.abort();
        }
    }

    /// One extra sweep after a delay (used when returning from
    /// background, where timers may have been suppressed).
    pub fn schedule_check_in(&self, delay_ms: u64) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            let _ = tx.send(SchedulerEvent::DueCheck);
        });
    }

    /// Abort every per-item timer, the idle wait, and the periodic sweep.
    /// Used by end_session.
    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().expect("timer map poisoned");
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        drop(timers);
        if let Some(handle) = self.idle_slot.lock().expect("idle slot poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self
            .periodic_slot
            .lock()
            .expect("periodic slot poisoned")
            .take()
        {
            handle.abort();
        }
    }

    pub fn pending_timer_count(&self) -> usize {
        self.timers.lock().expect("timer map poisoned").len()
    }

    pub fn has_idle_wait(&self) -> bool {
        self.idle_slot.lock().expect("idle slot poisoned").is_some()
    }

    pub fn has_timer(&self, item_id: &str) -> bool {
        self.timers
            .lock()
            .expect("timer map poisoned")
            .contains_key(item_id)
    }
}

fn wait_duration(due_at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (due_at - now).to_std().unwrap_or(std::time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use chrono::TimeZone;
    use std::time::Duration;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_at_the_due_instant() {
        let clock = Arc::new(ManualClock::start_at(0));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.register("000001", at(5_000));
        assert!(scheduler.has_timer("000001"));

        tokio::time::advance(Duration::from_millis(4_999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            rx.recv().await,
            Some(SchedulerEvent::Promote("000001".to_string()))
        );
        assert!(!scheduler.has_timer("000001"));
    }

    #[tokio::test(start_paused = true)]
    async fn reregistering_replaces_the_timer() {
        let clock = Arc::new(ManualClock::start_at(0));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.register("000001", at(5_000));
        scheduler.register("000001", at(10_000));
        assert_eq!(scheduler.pending_timer_count(), 1);

        tokio::time::advance(Duration::from_millis(6_000)).await;
        assert!(rx.try_recv().is_err(), "old timer must not fire");

        tokio::time::advance(Duration::from_millis(4_000)).await;
        assert_eq!(
            rx.recv().await,
            Some(SchedulerEvent::Promote("000001".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn past_due_registration_fires_immediately() {
        let clock = Arc::new(ManualClock::start_at(60_000));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.register("000001", at(1_000));
        tokio::time::advance(Duration::ZERO).await;
        assert_eq!(
            rx.recv().await,
            Some(SchedulerEvent::Promote("000001".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_wait_is_a_single_replaceable_slot() {
        let clock = Arc::new(ManualClock::start_at(0));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.start_idle_wait(at(10_000));
        scheduler.start_idle_wait(at(3_000));

        tokio::time::advance(Duration::from_millis(3_000)).await;
        assert_eq!(rx.recv().await, Some(SchedulerEvent::RefreshQueue));

        // The replaced wait never fires.
        tokio::time::advance(Duration::from_millis(60_000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_silences_everything() {
        let clock = Arc::new(ManualClock::start_at(0));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.register("000001", at(1_000));
        scheduler.register("000002", at(2_000));
        scheduler.start_idle_wait(at(3_000));
        scheduler.cancel_all();
        assert_eq!(scheduler.pending_timer_count(), 0);

        tokio::time::advance(Duration::from_millis(10_000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_check_ticks_until_cancelled() {
        let clock = Arc::new(ManualClock::start_at(0));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.start_periodic_check(60_000);
        tokio::time::advance(Duration::from_millis(60_000)).await;
        assert_eq!(rx.recv().await, Some(SchedulerEvent::DueCheck));
        tokio::time::advance(Duration::from_millis(60_000)).await;
        assert_eq!(rx.recv().await, Some(SchedulerEvent::DueCheck));

        scheduler.cancel_all();
        tokio::time::advance(Duration::from_millis(120_000)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_single_timer() {
        let clock = Arc::new(ManualClock::start_at(0));
        let (scheduler, mut rx) = DueScheduler::new(clock.clone());

        scheduler.register("000001", at(1_000));
        scheduler.cancel("000001");

        tokio::time::advance(Duration::from_millis(5_000)).await;
        assert!(rx.try_recv().is_err());
    }
}
