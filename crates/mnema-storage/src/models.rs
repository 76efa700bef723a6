use chrono::{DateTime, Utc};
use mnema_core::{Item, ReviewAction, ReviewRecord, StorageError};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub(crate) struct ItemRow {
    pub id: String,
    pub word: String,
    pub meaning: String,
    pub level: i64,
    pub virtual_review_count: f64,
    pub actual_review_count: i64,
    pub sensitivity: f64,
    pub next_review_time: i64,
    pub created_at: i64,
}

impl ItemRow {
    pub fn into_item(self) -> Item {
        Item {
            id: self.id,
            word: self.word,
            meaning: self.meaning,
            level: self.level as i32,
            virtual_review_count: self.virtual_review_count,
            actual_review_count: self.actual_review_count as u32,
            sensitivity: self.sensitivity,
            next_review_time: millis(self.next_review_time),
            created_at: millis(self.created_at),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RecordRow {
    pub item_id: String,
    pub dwell_millis: i64,
    pub review_time: i64,
    pub action: String,
    pub session_id: Option<String>,
}

impl RecordRow {
    pub fn into_record(self) -> Result<ReviewRecord, StorageError> {
        let action = ReviewAction::parse(&self.action).map_err(StorageError::Fatal)?;
        Ok(ReviewRecord {
            item_id: self.item_id,
            dwell_millis: self.dwell_millis,
            review_time: millis(self.review_time),
            action,
            session_id: self.session_id,
        })
    }
}

fn millis(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or_else(Utc::now)
}
