use crate::domain::{Item, ReviewRecord, SessionSummary};

/// Fire-and-forget session callbacks.
///
/// Callbacks may be delivered from the session owner or from the scheduler
/// worker; implementations must not take locks shared with the core.
/// Every method has an empty default body so consumers implement only what
/// they observe.
pub trait Notifier: Send + Sync {
    fn session_started(&self, _session_id: &str) {}
    fn session_ended(&self, _result: &SessionSummary) {}
    fn session_paused(&self, _session_id: &str) {}
    fn session_resumed(&self, _session_id: &str) {}
    fn study_started(&self, _item: &Item) {}
    fn study_completed(&self, _item: &Item, _record: &ReviewRecord, _updated: &Item) {}
    fn queue_empty(&self) {}
    fn queue_refreshed(&self, _item: Option<&Item>) {}
    fn item_added_to_queue(&self, _item: &Item) {}
    fn accidental_operation(&self, _dwell_millis: i64, _description: &str) {}
}

/// Notifier that drops every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {}
