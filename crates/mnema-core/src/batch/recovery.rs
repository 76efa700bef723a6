//! Startup recovery: replay the pending snapshot into storage, scan the
//! crash record log for reporting, and validate the hydrated store.

use super::format::{BackupLine, PendingSnapshot};
use crate::config::CoreConfig;
use crate::ports::{Clock, Storage};
use crate::store::ItemStore;
use std::sync::Arc;
use tracing::{info, warn};

/// 100 MB: above this estimated in-memory footprint recovery logs a
/// warning.
const MEMORY_WARN_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Items replayed from the pending snapshot.
    pub applied_updates: usize,
    /// Records replayed from the pending snapshot.
    pub applied_records: usize,
    /// Parseable crash-log lines whose item still exists.
    pub backup_records_seen: usize,
    /// Crash-log lines skipped (unparseable or orphaned).
    pub backup_lines_skipped: usize,
}

/// Run the full recovery procedure. Safe to call when neither file exists;
/// that case is a no-op and the report is all zeros.
pub async fn run_recovery(
    storage: &Arc<dyn Storage>,
    store: &ItemStore,
    clock: &dyn Clock,
    config: &CoreConfig,
) -> anyhow::Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    apply_snapshot(storage, store, config, &mut report).await?;
    scan_backup_log(store, config, &mut report).await;
    validate(store, clock, config);

    Ok(report)
}

async fn apply_snapshot(
    storage: &Arc<dyn Storage>,
    store: &ItemStore,
    config: &CoreConfig,
    report: &mut RecoveryReport,
) -> anyhow::Result<()> {
    let path = &config.pending_snapshot_path;
    if !path.exists() {
        return Ok(());
    }

    let raw = tokio::fs::read_to_string(path).await?;
    let snapshot: PendingSnapshot = match serde_json::from_str(&raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            // A corrupt snapshot cannot be replayed; the crash log still
            // covers the records it held.
            warn!(%err, "pending snapshot unparseable, discarding");
            tokio::fs::remove_file(path).await?;
            return Ok(());
        }
    };

    for (_, wire) in snapshot.updates {
        let item = wire.into_item();
        storage.put_item(&item).await?;
        store.update_item(item);
        report.applied_updates += 1;
    }
    for (id, records) in snapshot.records {
        for wire in records {
            let record = wire.into_record(&id);
            storage.append_record(&id, &record).await?;
            store.add_record(&id, record).await?;
            report.applied_records += 1;
        }
    }

    tokio::fs::remove_file(path).await?;
    info!(
        updates = report.applied_updates,
        records = report.applied_records,
        "pending snapshot replayed"
    );
    Ok(())
}

async fn scan_backup_log(store: &ItemStore, config: &CoreConfig, report: &mut RecoveryReport) {
    let path = &config.backup_log_path;
    if !path.exists() {
        return;
    }
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, "crash log unreadable, skipping scan");
            return;
        }
    };

    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<BackupLine>(line) {
            Ok(parsed) if store.get_item(&parsed.item_id).is_some() => {
                report.backup_records_seen += 1;
            }
            Ok(parsed) => {
                warn!(item = %parsed.item_id, "crash log line for unknown item");
                report.backup_lines_skipped += 1;
            }
            Err(err) => {
                warn!(%err, "unparseable crash log line");
                report.backup_lines_skipped += 1;
            }
        }
    }
    // The log is retained; only an explicit cleanup() truncates it.
}

fn validate(store: &ItemStore, clock: &dyn Clock, _config: &CoreConfig) {
    let stats = store.stats(clock.now());
    if stats.due_count > stats.total_count {
        warn!(
            due = stats.due_count,
            total = stats.total_count,
            "due count exceeds total; due-time index out of step"
        );
    }
    if stats.memory_usage_estimate > MEMORY_WARN_BYTES {
        warn!(
            bytes = stats.memory_usage_estimate,
            "estimated in-memory footprint above 100 MB"
        );
    }
    info!(
        total = stats.total_count,
        due = stats.due_count,
        "store validated after recovery"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::format::{ItemWire, RecordWire};
    use crate::domain::{ReviewAction, ReviewRecord};
    use crate::testing::{item_due_at, ManualClock, MemoryStorage};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn record(id: &str, millis: i64) -> ReviewRecord {
        ReviewRecord {
            item_id: id.to_string(),
            dwell_millis: 1_500,
            review_time: Utc.timestamp_millis_opt(millis).unwrap(),
            action: ReviewAction::ShowMeaning,
            session_id: Some("session-1".to_string()),
        }
    }

    async fn fresh_store(storage: Arc<MemoryStorage>, config: &CoreConfig) -> ItemStore {
        ItemStore::load(storage as Arc<dyn Storage>, config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_files_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::default().with_data_dir(dir.path());
        let storage = Arc::new(MemoryStorage::new());
        let store = fresh_store(storage.clone(), &config).await;
        let clock = ManualClock::start_at(0);

        let report = run_recovery(
            &(storage.clone() as Arc<dyn Storage>),
            &store,
            &clock,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(report, RecoveryReport::default());
        assert_eq!(storage.item_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_is_applied_then_deleted() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::default().with_data_dir(dir.path());
        let storage = Arc::new(MemoryStorage::new());
        storage.put_blocking(item_due_at("000001", 0));

        // Pre-crash state: item updated plus one record, never flushed.
        let mut updated = item_due_at("000001", 24_000);
        updated.actual_review_count = 1;
        updated.virtual_review_count = 1.0;
        let snapshot = PendingSnapshot {
            updates: HashMap::from([("000001".to_string(), ItemWire::from_item(&updated))]),
            records: HashMap::from([(
                "000001".to_string(),
                vec![RecordWire::from_record(&record("000001", 4_000))],
            )]),
        };
        std::fs::write(
            &config.pending_snapshot_path,
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

        let store = fresh_store(storage.clone(), &config).await;
        let clock = ManualClock::start_at(30_000);
        let report = run_recovery(
            &(storage.clone() as Arc<dyn Storage>),
            &store,
            &clock,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(report.applied_updates, 1);
        assert_eq!(report.applied_records, 1);
        assert!(!config.pending_snapshot_path.exists());

        // Both the durable store and the live store reflect the update.
        assert_eq!(storage.record_count("000001"), 1);
        let recovered = store.get_item("000001").unwrap();
        assert_eq!(recovered.actual_review_count, 1);
        assert_eq!(recovered.next_review_time.timestamp_millis(), 24_000);
    }

    #[tokio::test]
    async fn backup_scan_counts_and_skips() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::default().with_data_dir(dir.path());
        let storage = Arc::new(MemoryStorage::new());
        storage.put_blocking(item_due_at("000001", 0));

        let good = serde_json::to_string(&BackupLine {
            item_id: "000001".to_string(),
            record: RecordWire::from_record(&record("000001", 1_000)),
            timestamp: 1_000,
        })
        .unwrap();
        let orphan = good.replace("000001", "999999");
        let log = format!("{}\n{}\nnot json at all\n", good, orphan);
        std::fs::write(&config.backup_log_path, log).unwrap();

        let store = fresh_store(storage.clone(), &config).await;
        let clock = ManualClock::start_at(0);
        let report = run_recovery(
            &(storage.clone() as Arc<dyn Storage>),
            &store,
            &clock,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(report.backup_records_seen, 1);
        assert_eq!(report.backup_lines_skipped, 2);
        // The log is retained.
        assert!(config.backup_log_path.exists());
    }

    #[tokio::test]
    async fn crash_flush_recovery_end_to_end() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::default().with_data_dir(dir.path());
        let storage = Arc::new(MemoryStorage::new());
        for i in 1..=3 {
            storage.put_blocking(item_due_at(&format!("{:06}", i), 0));
        }
        let clock = Arc::new(ManualClock::start_at(0));

        // Pre-crash: three studies buffered, every flush fails.
        {
            let store = fresh_store(storage.clone(), &config).await;
            let writer = crate::batch::BatchWriter::new(
                storage.clone() as Arc<dyn Storage>,
                clock.clone() as Arc<dyn crate::ports::Clock>,
                &config,
            );
            storage.fail_next_writes(100);
            for i in 1..=3 {
                let id = format!("{:06}", i);
                let mut updated = store.get_item(&id).unwrap();
                updated.actual_review_count = 1;
                writer.submit(&updated, &record(&id, i * 1_000)).await.unwrap();
            }
            writer.force_flush().await.unwrap();
            assert!(config.pending_snapshot_path.exists());
            // Crash log captured all three lines before buffering.
            let log = std::fs::read_to_string(&config.backup_log_path).unwrap();
            assert_eq!(log.lines().count(), 3);
        }

        // Restart: storage healthy again, recovery replays the snapshot.
        storage.fail_next_writes(0);
        let store = fresh_store(storage.clone(), &config).await;
        let report = run_recovery(
            &(storage.clone() as Arc<dyn Storage>),
            &store,
            clock.as_ref(),
            &config,
        )
        .await
        .unwrap();

        assert_eq!(report.applied_updates, 3);
        assert_eq!(report.applied_records, 3);
        assert_eq!(report.backup_records_seen, 3);
        assert!(!config.pending_snapshot_path.exists());
        for i in 1..=3 {
            let id = format!("{:06}", i);
            assert_eq!(storage.get_item_blocking(&id).unwrap().actual_review_count, 1);
            assert_eq!(storage.record_count(&id), 1);
            assert_eq!(store.get_history(&id).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_discarded_not_fatal() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::default().with_data_dir(dir.path());
        std::fs::write(&config.pending_snapshot_path, "{ definitely not json").unwrap();

        let storage = Arc::new(MemoryStorage::new());
        let store = fresh_store(storage.clone(), &config).await;
        let clock = ManualClock::start_at(0);
        let report = run_recovery(
            &(storage.clone() as Arc<dyn Storage>),
            &store,
            &clock,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(report.applied_updates, 0);
        assert!(!config.pending_snapshot_path.exists());
    }
}
