//! Shared fixtures for core tests.

use crate::domain::{Item, ReviewAction, ReviewRecord};
use chrono::{TimeZone, Utc};

/// A fresh item due at the given instant (millis from the epoch).
pub fn item_due_at(id: &str, due_millis: i64) -> Item {
    let t = Utc.timestamp_millis_opt(due_millis).unwrap();
    Item::new_at(
        id.to_string(),
        format!("word-{}", id),
        format!("meaning-{}", id),
        1,
        t,
    )
}

/// A review record at the given instant.
pub fn record_at(item_id: &str, millis: i64, dwell_millis: i64, action: ReviewAction) -> ReviewRecord {
    ReviewRecord {
        item_id: item_id.to_string(),
        dwell_millis,
        review_time: Utc.timestamp_millis_opt(millis).unwrap(),
        action,
        session_id: None,
    }
}
