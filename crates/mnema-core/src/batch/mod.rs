//! Write-behind batch pipeline.
//!
//! Completed studies land here twice: once as a line appended to the crash
//! record log (immediately, before buffering), and once in the pending
//! buffer that is flushed to storage in batches. A failed flush serializes
//! the whole buffer to the pending snapshot and keeps it in memory for the
//! next attempt, so no record is ever lost between the log and the store.

pub mod format;
pub mod recovery;

use crate::config::CoreConfig;
use crate::domain::{CoreError, Item, ReviewRecord, StorageError};
use crate::ports::{Clock, Storage};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use format::{BackupLine, ItemWire, PendingSnapshot, RecordWire};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use recovery::{run_recovery, RecoveryReport};

/// Bound on any single storage or file operation; a timeout is treated as
/// a transient failure and falls through to the snapshot path.
const STORAGE_OP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Default)]
struct Pending {
    updates: HashMap<String, Item>,
    records: HashMap<String, Vec<ReviewRecord>>,
    record_count: usize,
    last_flush: Option<DateTime<Utc>>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.records.is_empty()
    }

    fn to_snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            updates: self
                .updates
                .iter()
                .map(|(id, item)| (id.clone(), ItemWire::from_item(item)))
                .collect(),
            records: self
                .records
                .iter()
                .map(|(id, records)| {
                    (
                        id.clone(),
                        records.iter().map(RecordWire::from_record).collect(),
                    )
                })
                .collect(),
        }
    }
}

/// The only component that mutates the durable store.
pub struct BatchWriter {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    backup_log_path: PathBuf,
    snapshot_path: PathBuf,
    flush_interval_ms: i64,
    size_threshold: usize,
    auto_save_interval_ms: u64,
    pending: Mutex<Pending>,
}

impl BatchWriter {
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: &CoreConfig) -> Self {
        Self {
            storage,
            clock,
            backup_log_path: config.backup_log_path.clone(),
            snapshot_path: config.pending_snapshot_path.clone(),
            flush_interval_ms: config.batch_interval_ms,
            size_threshold: config.batch_size_threshold,
            auto_save_interval_ms: config.auto_save_interval_ms,
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Enqueue a completed study: the record goes to the crash log first,
    /// then both the updated item and the record enter the buffer.
    /// Fatal persistence failures from a triggered flush propagate;
    /// everything else is absorbed.
    pub async fn submit(&self, updated: &Item, record: &ReviewRecord) -> Result<(), CoreError> {
        if let Err(err) = self.append_backup_line(record).await {
            // The buffer still holds the data; losing a log line only
            // narrows crash coverage.
            warn!(item = %record.item_id, %err, "crash log append failed");
        }

        let mut pending = self.pending.lock().await;
        pending.updates.insert(updated.id.clone(), updated.clone());
        pending
            .records
            .entry(record.item_id.clone())
            .or_default()
            .push(record.clone());
        pending.record_count += 1;
        self.flush_if_due(&mut pending).await
    }

    /// Enqueue an item write with no record (imports, metadata edits).
    pub async fn submit_item(&self, item: &Item) -> Result<(), CoreError> {
        let mut pending = self.pending.lock().await;
        pending.updates.insert(item.id.clone(), item.clone());
        self.flush_if_due(&mut pending).await
    }

    /// Flush regardless of thresholds (background, end of session,
    /// cleanup).
    pub async fn force_flush(&self) -> Result<(), CoreError> {
        let mut pending = self.pending.lock().await;
        self.flush_locked(&mut pending).await
    }

    /// Spawn the recurring auto-flush. Aborted on drop of the handle.
    pub fn spawn_auto_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        let period = std::time::Duration::from_millis(writer.auto_save_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(err) = writer.force_flush().await {
                    warn!(%err, "auto-flush failed");
                }
            }
        })
    }

    /// Truncate the crash log. The only sanctioned truncation; call after
    /// a confirmed-healthy flush.
    pub async fn cleanup(&self) -> Result<(), CoreError> {
        self.force_flush().await?;
        if self.backup_log_path.exists() {
            if let Err(err) = tokio::fs::remove_file(&self.backup_log_path).await {
                warn!(%err, "failed to truncate crash log");
            }
        }
        Ok(())
    }

    /// (pending updates, pending records); test and diagnostics hook.
    pub async fn pending_counts(&self) -> (usize, usize) {
        let pending = self.pending.lock().await;
        (pending.updates.len(), pending.record_count)
    }

    async fn flush_if_due(&self, pending: &mut Pending) -> Result<(), CoreError> {
        let now = self.clock.now();
        let interval_elapsed = match pending.last_flush {
            Some(last) => now - last >= ChronoDuration::milliseconds(self.flush_interval_ms),
            None => false,
        };
        if pending.last_flush.is_none() {
            pending.last_flush = Some(now);
        }
        let due = interval_elapsed
            || pending.updates.len() >= self.size_threshold
            || pending.record_count >= self.size_threshold;
        if due {
            self.flush_locked(pending).await
        } else {
            Ok(())
        }
    }

    async fn flush_locked(&self, pending: &mut Pending) -> Result<(), CoreError> {
        let now = self.clock.now();
        if pending.is_empty() {
            pending.last_flush = Some(now);
            return Ok(());
        }

        if let Err(err) = self.write_out(pending).await {
            self.snapshot_pending(pending).await;
            match err {
                StorageError::Fatal(msg) => {
                    warn!(%msg, "fatal storage failure during flush");
                    Err(CoreError::PersistFatal(msg))
                }
                StorageError::Transient(msg) => {
                    // Retryable: keep the buffer, try again on the next
                    // trigger.
                    warn!(%msg, "transient storage failure during flush");
                    Ok(())
                }
            }
        } else {
            debug!(
                updates = pending.updates.len(),
                records = pending.record_count,
                "flush complete"
            );
            pending.updates.clear();
            pending.records.clear();
            pending.record_count = 0;
            pending.last_flush = Some(now);
            // Everything the snapshot held is now durable.
            if self.snapshot_path.exists() {
                if let Err(err) = tokio::fs::remove_file(&self.snapshot_path).await {
                    warn!(%err, "failed to drop stale pending snapshot");
                }
            }
            Ok(())
        }
    }

    async fn write_out(&self, pending: &Pending) -> Result<(), StorageError> {
        for item in pending.updates.values() {
            bounded(self.storage.put_item(item)).await?;
        }
        for (id, records) in &pending.records {
            for record in records {
                bounded(self.storage.append_record(id, record)).await?;
            }
        }
        Ok(())
    }

    async fn snapshot_pending(&self, pending: &Pending) {
        let snapshot = pending.to_snapshot();
        let json = match serde_json::to_string(&snapshot) {
            Ok(json) => json,
            Err(err) => {
                warn!(%err, "pending snapshot serialization failed");
                return;
            }
        };
        match tokio::fs::write(&self.snapshot_path, json).await {
            Ok(()) => info!(
                updates = snapshot.updates.len(),
                path = %self.snapshot_path.display(),
                "pending snapshot written"
            ),
            Err(err) => warn!(%err, "pending snapshot write failed"),
        }
    }

    async fn append_backup_line(&self, record: &ReviewRecord) -> anyhow::Result<()> {
        let line = BackupLine {
            item_id: record.item_id.clone(),
            record: RecordWire::from_record(record),
            timestamp: self.clock.now().timestamp_millis(),
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');

        let write = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.backup_log_path)
                .await?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
            Ok::<_, std::io::Error>(())
        };
        tokio::time::timeout(STORAGE_OP_TIMEOUT, write)
            .await
            .map_err(|_| anyhow::anyhow!("crash log append timed out"))??;
        Ok(())
    }
}

async fn bounded<F>(op: F) -> Result<(), StorageError>
where
    F: std::future::Future<Output = Result<(), StorageError>>,
{
    match tokio::time::timeout(STORAGE_OP_TIMEOUT, op).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Transient(
            "storage operation timed out".to_string(),
        )),
    }
}
