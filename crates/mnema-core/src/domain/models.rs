use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Learner gesture classified by the gesture layer, applied to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    SwipeNext,
    ShowMeaning,
    MarkDifficult,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::SwipeNext => "SWIPE_NEXT",
            ReviewAction::ShowMeaning => "SHOW_MEANING",
            ReviewAction::MarkDifficult => "MARK_DIFFICULT",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        match s {
            "SWIPE_NEXT" => Ok(Self::SwipeNext),
            "SHOW_MEANING" => Ok(Self::ShowMeaning),
            "MARK_DIFFICULT" => Ok(Self::MarkDifficult),
            _ => Err(format!("Unknown review action: {}", s)),
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A study item: one unit of content paired with its meaning, plus the
/// scheduling state that drives when it comes due again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub word: String,
    pub meaning: String,
    /// Difficulty tag, informational only.
    pub level: i32,
    /// Virtual review count N, real-valued, >= 0.
    pub virtual_review_count: f64,
    /// Actual review count n, integer, >= 0.
    pub actual_review_count: u32,
    /// Sensitivity S in [1.0, 3.0].
    pub sensitivity: f64,
    pub next_review_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// New items start with zero counts, unit sensitivity, and are
    /// immediately due.
    pub fn new_at(
        id: String,
        word: String,
        meaning: String,
        level: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            word,
            meaning,
            level,
            virtual_review_count: 0.0,
            actual_review_count: 0,
            sensitivity: 1.0,
            next_review_time: now,
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_time <= now
    }
}

/// One completed (non-discarded) gesture on an item. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub item_id: String,
    pub dwell_millis: i64,
    pub review_time: DateTime<Utc>,
    pub action: ReviewAction,
    pub session_id: Option<String>,
}

impl ReviewRecord {
    pub fn is_accidental(&self, threshold_ms: i64) -> bool {
        self.dwell_millis < threshold_ms
    }
}

/// Result of scanning recent review history for suspicious input patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    None,
    /// Three or more of the last five records were accidental.
    FrequentAccidents,
    /// Dwell stddev over the last five records exceeds half the mean.
    HighVariance,
}

/// In-process session bookkeeping. One active session per process.
#[derive(Debug, Clone, PartialEq)]
pub struct StudySession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub items_studied: u32,
    pub total_actions: u32,
    pub is_active: bool,
}

/// Summary handed out by `end_session` and the `SessionEnded` callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub items_studied: u32,
    pub total_actions: u32,
    pub duration_ms: i64,
}

/// Aggregate store counters used by recovery validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_count: usize,
    pub due_count: usize,
    /// Rough in-memory footprint of items plus cached history, in bytes.
    pub memory_usage_estimate: usize,
}
