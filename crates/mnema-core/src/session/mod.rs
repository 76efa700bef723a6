//! Session management: the state machine that ties the queue, the store,
//! the scheduler, the gesture classifier, and the batch writer together.
//!
//! One session owns every mutation of core state. Scheduler timers never
//! touch the queue directly; their messages are drained here, on the
//! owner's serial path, where each promotion is re-verified against the
//! item's current due time.

use crate::batch::BatchWriter;
use crate::config::CoreConfig;
use crate::domain::{
    Anomaly, CoreError, Item, ReviewAction, ReviewRecord, SessionSummary, StudySession,
};
use crate::gesture::{GestureClassifier, TouchEvent};
use crate::ports::{Clock, Notifier};
use crate::queue::RecommendationQueue;
use crate::review::compute_update;
use crate::scheduler::{DueScheduler, SchedulerEvent};
use crate::store::ItemStore;
use crate::strength::detect_anomaly;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, instrument, warn};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Paused,
    Ended,
}

pub struct SessionManager {
    store: Arc<ItemStore>,
    batch: Arc<BatchWriter>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: CoreConfig,
    scheduler: DueScheduler,
    events: UnboundedReceiver<SchedulerEvent>,
    classifier: GestureClassifier,
    queue: RecommendationQueue,

    state: SessionState,
    session: Option<StudySession>,
    /// Set while a study is in progress; dwell is measured from here.
    study_start: Option<DateTime<Utc>>,
    auto_flush: Option<tokio::task::JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<ItemStore>,
        batch: Arc<BatchWriter>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: CoreConfig,
    ) -> Self {
        let (scheduler, events) = DueScheduler::new(Arc::clone(&clock));
        let classifier = GestureClassifier::new(&config);
        Self {
            store,
            batch,
            clock,
            notifier,
            config,
            scheduler,
            events,
            classifier,
            queue: RecommendationQueue::new(),
            state: SessionState::Idle,
            session: None,
            study_start: None,
            auto_flush: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn queue(&self) -> &RecommendationQueue {
        &self.queue
    }

    pub fn scheduler(&self) -> &DueScheduler {
        &self.scheduler
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn current_session(&self) -> Option<&StudySession> {
        self.session.as_ref()
    }

    /// Start the single session. Builds the initial queue from everything
    /// currently due.
    #[instrument(skip(self))]
    pub fn start_session(&mut self) -> Result<String, CoreError> {
        if matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(CoreError::SessionAlreadyActive);
        }
        let now = self.clock.now();
        let session_id = format!("session-{}", now.timestamp_millis());

        self.queue = RecommendationQueue::build_initial(&self.store.all_items(), now);
        self.state = SessionState::Active;
        self.session = Some(StudySession {
            id: session_id.clone(),
            started_at: now,
            items_studied: 0,
            total_actions: 0,
            is_active: true,
        });
        self.study_start = None;

        debug!(session = %session_id, queued = self.queue.len(), "session started");
        self.scheduler
            .start_periodic_check(self.config.review_check_interval_ms);
        if let Some(old) = self.auto_flush.replace(self.batch.spawn_auto_flush()) {
            old.abort();
        }
        self.notifier.session_started(&session_id);
        if self.queue.is_empty() {
            self.observe_empty_queue(now);
        }
        Ok(session_id)
    }

    /// Begin studying the item under the cursor; dwell timing starts now.
    pub fn start_current_study(&mut self) -> Result<Item, CoreError> {
        self.ensure_active()?;
        let id = self
            .queue
            .current()
            .ok_or(CoreError::NoCurrentItem)?
            .to_string();
        let item = self
            .store
            .get_item(&id)
            .ok_or(CoreError::ItemNotFound(id))?;
        self.study_start = Some(self.clock.now());
        self.notifier.study_started(&item);
        Ok(item)
    }

    /// Feed one raw touch event through the classifier and apply whatever
    /// it emits. A pending single tap whose window has closed is applied
    /// first.
    pub async fn on_touch(&mut self, event: &TouchEvent) -> Result<Option<Item>, CoreError> {
        if self.state != SessionState::Active {
            return Ok(None);
        }
        let mut outcome = None;
        if let Some(action) = self.classifier.flush(self.clock.now()) {
            outcome = self.on_gesture(action).await?;
        }
        if let Some(action) = self.classifier.on_event(event) {
            outcome = self.on_gesture(action).await?;
        }
        Ok(outcome)
    }

    /// Confirm a held single tap once its window closes. Call from a UI
    /// tick; a no-op otherwise.
    pub async fn flush_gesture(&mut self) -> Result<Option<Item>, CoreError> {
        if self.state != SessionState::Active {
            return Ok(None);
        }
        match self.classifier.flush(self.clock.now()) {
            Some(action) => self.on_gesture(action).await,
            None => Ok(None),
        }
    }

    /// Apply one classified gesture to the current study.
    ///
    /// Rejected without any state change when no study is running or when
    /// the dwell is under the accidental threshold. On success the item is
    /// rescored, persisted through the batch pipeline, removed from the
    /// queue, and handed to the scheduler for its next due time.
    #[instrument(skip(self), fields(action = %action))]
    pub async fn on_gesture(&mut self, action: ReviewAction) -> Result<Option<Item>, CoreError> {
        match self.state {
            SessionState::Paused => return Ok(None),
            SessionState::Active => {}
            _ => return Err(CoreError::NoActiveSession),
        }
        let started = self.study_start.ok_or(CoreError::NoCurrentItem)?;
        let now = self.clock.now();
        let dwell_millis = (now - started).num_milliseconds();

        if dwell_millis < self.config.accidental_threshold_ms {
            let description = format!("{} after {} ms", action, dwell_millis);
            debug!(%description, "accidental operation rejected");
            self.notifier.accidental_operation(dwell_millis, &description);
            return Ok(None);
        }

        let id = self
            .queue
            .current()
            .ok_or(CoreError::NoCurrentItem)?
            .to_string();
        let item = self
            .store
            .get_item(&id)
            .ok_or_else(|| CoreError::ItemNotFound(id.clone()))?;

        let record = ReviewRecord {
            item_id: id.clone(),
            dwell_millis,
            review_time: now,
            action,
            session_id: self.session.as_ref().map(|s| s.id.clone()),
        };
        let history = self.store.get_history(&id).await?;
        let updated = compute_update(&item, &record, &history, &self.config);

        let mut recent = history;
        recent.push(record.clone());
        let anomaly = detect_anomaly(&recent, self.config.accidental_threshold_ms);
        if anomaly != Anomaly::None {
            warn!(item = %id, ?anomaly, "input anomaly detected");
        }

        self.store.update_item(updated.clone());
        self.store.add_record(&id, record.clone()).await?;

        // The new due time is always in the future (interval floor), so
        // the item leaves the queue and waits on its timer.
        self.queue.remove_item(&id);
        self.scheduler.register(&id, updated.next_review_time);

        if let Some(session) = self.session.as_mut() {
            session.items_studied += 1;
            session.total_actions += 1;
        }
        self.study_start = None;

        if let Err(err) = self.batch.submit(&updated, &record).await {
            // Only fatal persistence failures surface this far; flush the
            // wreckage and end the session.
            warn!(%err, "fatal persistence failure, ending session");
            let _ = self.finish_session().await;
            return Err(err);
        }

        self.notifier.study_completed(&item, &record, &updated);

        if self.queue.is_empty() {
            self.observe_empty_queue(now);
        }
        Ok(Some(updated))
    }

    /// Switch to the next item to study.
    ///
    /// A due item at the head of the queue preempts the cursor (this is
    /// where promoted and imported items take over). Otherwise, with a
    /// study in progress, the cursor advances and the current item's
    /// timing is discarded, wrapping to the head when it falls off the
    /// end. With no study in progress the cursor already points at the
    /// successor of the last studied item and stays put.
    pub fn move_to_next(&mut self) -> Result<Option<Item>, CoreError> {
        self.ensure_active()?;
        let now = self.clock.now();

        if self.queue.is_empty() {
            self.study_start = None;
            self.observe_empty_queue(now);
            return Ok(None);
        }

        let head_is_due = self
            .queue
            .head()
            .and_then(|id| self.store.get_item(id))
            .is_some_and(|item| item.is_due(now));

        if head_is_due && self.queue.position() != 0 {
            self.queue.snap_to_head();
            self.study_start = None;
        } else if self.study_start.take().is_some() && !self.queue.advance() {
            self.queue.snap_to_head();
        }

        let item = self
            .queue
            .current()
            .and_then(|id| self.store.get_item(id));
        Ok(item)
    }

    /// Drain every pending scheduler message on the owner path. Returns
    /// the number handled. While paused, messages are dropped; resume
    /// re-checks dueness from the store instead.
    pub async fn drain_scheduler_events(&mut self) -> Result<usize, CoreError> {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            if self.state != SessionState::Active {
                continue;
            }
            match event {
                SchedulerEvent::Promote(id) => self.handle_promotion(&id),
                SchedulerEvent::RefreshQueue => self.handle_refresh(),
                SchedulerEvent::DueCheck => self.promote_due_items(),
            }
            handled += 1;
        }
        Ok(handled)
    }

    fn handle_promotion(&mut self, id: &str) {
        let now = self.clock.now();
        let Some(item) = self.store.get_item(id) else {
            debug!(item = %id, "promotion for a removed item dropped");
            return;
        };
        // Timers may fire late or against stale state; the item's current
        // due time decides.
        if !item.is_due(now) {
            self.scheduler.register(id, item.next_review_time);
            return;
        }
        if self.queue.contains(id) {
            return;
        }

        let had_current = self.queue.current().is_some();
        self.queue.add_item(id);
        self.notifier.item_added_to_queue(&item);
        debug!(item = %id, "item promoted into queue");

        if !had_current {
            // Nothing was on deck: surface the refreshed queue and start
            // studying the promoted item immediately.
            self.queue.snap_to_head();
            self.notifier.queue_refreshed(Some(&item));
            self.study_start = Some(now);
            self.notifier.study_started(&item);
        }
    }

    fn handle_refresh(&mut self) {
        let now = self.clock.now();
        self.queue = RecommendationQueue::build_initial(&self.store.all_items(), now);
        match self
            .queue
            .current()
            .and_then(|id| self.store.get_item(id))
        {
            Some(item) => {
                self.notifier.queue_refreshed(Some(&item));
                if self.study_start.is_none() {
                    self.study_start = Some(now);
                    self.notifier.study_started(&item);
                }
            }
            None => {
                // Fired with nothing due; re-arm for the next instant.
                if let Some(next) = self.store.next_due_after(now) {
                    self.scheduler.start_idle_wait(next);
                }
            }
        }
    }

    pub fn pause_session(&mut self) -> Result<(), CoreError> {
        self.ensure_active()?;
        self.state = SessionState::Paused;
        self.queue.pause();
        if let Some(session) = &self.session {
            self.notifier.session_paused(&session.id);
        }
        Ok(())
    }

    pub fn resume_session(&mut self) -> Result<(), CoreError> {
        if self.state != SessionState::Paused {
            return Err(CoreError::NoActiveSession);
        }
        self.state = SessionState::Active;
        self.queue.resume();
        if let Some(session) = &self.session {
            self.notifier.session_resumed(&session.id);
        }
        // Promotions were discarded while paused; re-check from the store.
        self.promote_due_items();
        Ok(())
    }

    /// End the session: stop the current study without scoring it, cancel
    /// every timer, force-flush the batch pipeline.
    #[instrument(skip(self))]
    pub async fn end_session(&mut self) -> Result<SessionSummary, CoreError> {
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(CoreError::NoActiveSession);
        }
        self.finish_session().await
    }

    /// Force a flush before the process loses the foreground.
    pub async fn on_app_background(&self) {
        if let Err(err) = self.batch.force_flush().await {
            warn!(%err, "background flush failed");
        }
    }

    /// Re-check due items after returning to the foreground, and once
    /// more after the catch-up interval in case storage was still
    /// settling.
    pub fn on_app_foreground(&mut self) {
        if self.state == SessionState::Active {
            self.promote_due_items();
            self.scheduler
                .schedule_check_in(self.config.background_check_interval_ms);
        }
    }

    /// Create and register a new item. New items are immediately due; in
    /// an active session they enter the queue at the head.
    pub async fn add_item(
        &mut self,
        word: &str,
        meaning: &str,
        level: i32,
    ) -> Result<Item, CoreError> {
        let now = self.clock.now();
        let id = self.store.issue_id()?;
        let item = Item::new_at(id, word.to_string(), meaning.to_string(), level, now);

        self.store.add_item(item.clone())?;
        self.batch.submit_item(&item).await?;

        if self.state == SessionState::Active && self.queue.add_item(&item.id) {
            self.notifier.item_added_to_queue(&item);
        }
        Ok(item)
    }

    fn promote_due_items(&mut self) {
        let now = self.clock.now();
        for id in self.store.due_item_ids(now) {
            if !self.queue.contains(&id) {
                if let Some(item) = self.store.get_item(&id) {
                    self.queue.add_item(&id);
                    self.notifier.item_added_to_queue(&item);
                }
            }
        }
    }

    fn observe_empty_queue(&mut self, now: DateTime<Utc>) {
        if !self.scheduler.has_idle_wait() {
            if let Some(next) = self.store.next_due_after(now) {
                self.scheduler.start_idle_wait(next);
            }
            self.notifier.queue_empty();
        }
    }

    async fn finish_session(&mut self) -> Result<SessionSummary, CoreError> {
        let now = self.clock.now();
        self.scheduler.cancel_all();
        if let Some(task) = self.auto_flush.take() {
            task.abort();
        }
        self.study_start = None;

        if let Err(err) = self.batch.force_flush().await {
            warn!(%err, "final flush failed while ending session");
        }

        let session = self.session.take();
        let summary = SessionSummary {
            session_id: session.as_ref().map(|s| s.id.clone()).unwrap_or_default(),
            items_studied: session.as_ref().map(|s| s.items_studied).unwrap_or(0),
            total_actions: session.as_ref().map(|s| s.total_actions).unwrap_or(0),
            duration_ms: session
                .map(|s| (now - s.started_at).num_milliseconds())
                .unwrap_or(0),
        };
        self.state = SessionState::Ended;
        self.notifier.session_ended(&summary);
        Ok(summary)
    }

    fn ensure_active(&self) -> Result<(), CoreError> {
        match self.state {
            SessionState::Active => Ok(()),
            _ => Err(CoreError::NoActiveSession),
        }
    }
}
