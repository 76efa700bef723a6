use crate::models::{ItemRow, RecordRow};
use async_trait::async_trait;
use mnema_core::{Item, ReviewRecord, Storage, StorageError, StorageResult};
use sqlx::{query, query_as, SqlitePool};

/// How many records per item the durable side retains and serves; matches
/// the core's per-item history cap.
const HISTORY_RETENTION: i64 = 200;

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool (maintenance, tests).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn put_item(&self, item: &Item) -> StorageResult<()> {
        query(
            "INSERT INTO items
             (id, word, meaning, level, virtual_review_count, actual_review_count,
              sensitivity, next_review_time, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                word = excluded.word,
                meaning = excluded.meaning,
                level = excluded.level,
                virtual_review_count = excluded.virtual_review_count,
                actual_review_count = excluded.actual_review_count,
                sensitivity = excluded.sensitivity,
                next_review_time = excluded.next_review_time,
                created_at = excluded.created_at",
        )
        .bind(&item.id)
        .bind(&item.word)
        .bind(&item.meaning)
        .bind(item.level as i64)
        .bind(item.virtual_review_count)
        .bind(item.actual_review_count as i64)
        .bind(item.sensitivity)
        .bind(item.next_review_time.timestamp_millis())
        .bind(item.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn append_record(&self, item_id: &str, record: &ReviewRecord) -> StorageResult<()> {
        query(
            "INSERT INTO review_records
             (item_id, dwell_millis, review_time, action, session_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(item_id)
        .bind(record.dwell_millis)
        .bind(record.review_time.timestamp_millis())
        .bind(record.action.as_str())
        .bind(&record.session_id)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        // Trim beyond the retention window so an item's history cannot
        // grow without bound.
        query(
            "DELETE FROM review_records
             WHERE item_id = ?
               AND id NOT IN (
                   SELECT id FROM review_records
                   WHERE item_id = ?
                   ORDER BY id DESC
                   LIMIT ?
               )",
        )
        .bind(item_id)
        .bind(item_id)
        .bind(HISTORY_RETENTION)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn load_all_items(&self) -> StorageResult<Vec<Item>> {
        let rows = query_as::<_, ItemRow>(
            "SELECT id, word, meaning, level, virtual_review_count, actual_review_count,
                    sensitivity, next_review_time, created_at
             FROM items",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }

    async fn load_history(&self, item_id: &str) -> StorageResult<Vec<ReviewRecord>> {
        let rows = query_as::<_, RecordRow>(
            "SELECT item_id, dwell_millis, review_time, action, session_id
             FROM review_records
             WHERE item_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(item_id)
        .bind(HISTORY_RETENTION)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        // Rows come newest-first; history is served oldest-first.
        let mut records = rows
            .into_iter()
            .map(RecordRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }
}

/// Split sqlx failures into retryable and fatal. Contention and transport
/// problems retry through the pending snapshot; everything else surfaces.
fn classify(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StorageError::Transient(err.to_string())
        }
        sqlx::Error::Database(ref db) if db.message().contains("locked") => {
            StorageError::Transient(err.to_string())
        }
        other => StorageError::Fatal(other.to_string()),
    }
}
