use std::path::{Path, PathBuf};

/// Tunable constants for the review core. All values are adjustable at
/// startup; `Default` carries the shipped defaults.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Capacity of the hot-item LRU.
    pub hot_cache_capacity: usize,
    /// Capacity of the per-item history LRU.
    pub history_cache_capacity: usize,
    /// Maximum review records retained per item; oldest dropped beyond this.
    pub history_max_per_item: usize,

    /// Gestures with dwell below this are rejected as accidental.
    pub accidental_threshold_ms: i64,
    /// Two taps within this window classify as a double-tap.
    pub double_tap_threshold_ms: i64,
    /// Presses at least this long classify as a long-press.
    pub long_press_threshold_ms: i64,
    /// Minimum dominant-axis travel for a fling.
    pub fling_min_distance_px: f32,
    /// Minimum dominant-axis velocity for a fling, px/s.
    pub fling_min_velocity: f32,

    /// Base review interval, milliseconds.
    pub base_interval_ms: i64,
    /// Floor on the final interval, milliseconds.
    pub min_interval_ms: i64,

    /// Elapsed time since last flush that forces the next flush.
    pub batch_interval_ms: i64,
    /// Pending update or record count that forces a flush.
    pub batch_size_threshold: usize,
    /// Recurring auto-flush period.
    pub auto_save_interval_ms: u64,
    /// Periodic due re-check period.
    pub review_check_interval_ms: u64,
    /// Due re-check period after returning from background.
    pub background_check_interval_ms: u64,

    /// Append-only crash record log.
    pub backup_log_path: PathBuf,
    /// Pending snapshot written when a flush fails.
    pub pending_snapshot_path: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            hot_cache_capacity: 1000,
            history_cache_capacity: 500,
            history_max_per_item: 200,

            accidental_threshold_ms: 200,
            double_tap_threshold_ms: 300,
            long_press_threshold_ms: 500,
            fling_min_distance_px: 100.0,
            fling_min_velocity: 50.0,

            base_interval_ms: 10_000,
            min_interval_ms: 5_000,

            batch_interval_ms: 5_000,
            batch_size_threshold: 10,
            auto_save_interval_ms: 30_000,
            review_check_interval_ms: 60_000,
            background_check_interval_ms: 30_000,

            backup_log_path: PathBuf::from("backup_study_records.json"),
            pending_snapshot_path: PathBuf::from("pending_updates.json"),
        }
    }
}

impl CoreConfig {
    /// Rebase both durability files under a data directory.
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.backup_log_path = dir.join("backup_study_records.json");
        self.pending_snapshot_path = dir.join("pending_updates.json");
        self
    }
}
