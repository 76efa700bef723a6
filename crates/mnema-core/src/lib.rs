pub mod batch;
pub mod config;
pub mod domain;
pub mod gesture;
pub mod ports;
pub mod queue;
pub mod review;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod strength;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use domain::{
    Anomaly, CoreError, IdCounter, Item, ReviewAction, ReviewRecord, SessionSummary,
    StorageError, StorageResult, StoreStats, StudySession,
};

pub use config::CoreConfig;

pub use ports::{Clock, Notifier, NullNotifier, Storage, SystemClock};

pub use batch::{run_recovery, BatchWriter, RecoveryReport};
pub use gesture::{GestureClassifier, TouchEvent};
pub use queue::RecommendationQueue;
pub use review::compute_update;
pub use scheduler::{DueScheduler, SchedulerEvent};
pub use session::{SessionManager, SessionState};
pub use store::ItemStore;
