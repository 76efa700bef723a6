pub mod errors;
pub mod item_id;
pub mod models;

pub use errors::{CoreError, StorageError, StorageResult};
pub use item_id::{format_item_id, parse_item_id, IdCounter, MAX_ITEM_ID};
pub use models::{
    Anomaly, Item, ReviewAction, ReviewRecord, SessionSummary, StoreStats, StudySession,
};
