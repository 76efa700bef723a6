//! On-disk wire formats for the crash record log and the pending snapshot.
//!
//! Key names and value shapes are fixed; both files are consumed by
//! recovery after a process restart, possibly one written by an older
//! build.

use crate::domain::{Item, ReviewAction, ReviewRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A review record as serialized inside both files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordWire {
    pub review_time: i64,
    pub dwell_time: i64,
    pub action: ReviewAction,
    pub session_id: Option<String>,
}

impl RecordWire {
    pub fn from_record(record: &ReviewRecord) -> Self {
        Self {
            review_time: record.review_time.timestamp_millis(),
            dwell_time: record.dwell_millis,
            action: record.action,
            session_id: record.session_id.clone(),
        }
    }

    pub fn into_record(self, item_id: &str) -> ReviewRecord {
        ReviewRecord {
            item_id: item_id.to_string(),
            dwell_millis: self.dwell_time,
            review_time: millis_to_instant(self.review_time),
            action: self.action,
            session_id: self.session_id,
        }
    }
}

/// One line of `backup_study_records.json`. Appended, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupLine {
    pub item_id: String,
    pub record: RecordWire,
    pub timestamp: i64,
}

/// An item as serialized into the pending snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemWire {
    pub id: String,
    pub word: String,
    pub meaning: String,
    pub level: i32,
    pub virtual_review_count: f64,
    pub actual_review_count: u32,
    pub sensitivity: f64,
    pub next_review_time: i64,
    pub created_at: i64,
}

impl ItemWire {
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            word: item.word.clone(),
            meaning: item.meaning.clone(),
            level: item.level,
            virtual_review_count: item.virtual_review_count,
            actual_review_count: item.actual_review_count,
            sensitivity: item.sensitivity,
            next_review_time: item.next_review_time.timestamp_millis(),
            created_at: item.created_at.timestamp_millis(),
        }
    }

    pub fn into_item(self) -> Item {
        Item {
            id: self.id,
            word: self.word,
            meaning: self.meaning,
            level: self.level,
            virtual_review_count: self.virtual_review_count,
            actual_review_count: self.actual_review_count,
            sensitivity: self.sensitivity,
            next_review_time: millis_to_instant(self.next_review_time),
            created_at: millis_to_instant(self.created_at),
        }
    }
}

/// `pending_updates.json`: the whole write-behind buffer, overwritten on
/// each failed flush.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingSnapshot {
    pub updates: HashMap<String, ItemWire>,
    pub records: HashMap<String, Vec<RecordWire>>,
}

fn millis_to_instant(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
