use crate::domain::{Item, ReviewRecord, StorageResult};
use async_trait::async_trait;

/// Durable backing store for items and their review records.
///
/// The core assumes at-least-once durability on successful return.
/// Implementations may be in-memory, file-based, or database-backed; the
/// batch writer is the only component that calls the mutating methods
/// during normal operation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Insert or replace an item.
    async fn put_item(&self, item: &Item) -> StorageResult<()>;

    /// Append one review record to an item's history.
    async fn append_record(&self, item_id: &str, record: &ReviewRecord) -> StorageResult<()>;

    /// Load every stored item.
    async fn load_all_items(&self) -> StorageResult<Vec<Item>>;

    /// Load an item's review history, oldest first, bounded to the
    /// retention window.
    async fn load_history(&self, item_id: &str) -> StorageResult<Vec<ReviewRecord>>;
}
