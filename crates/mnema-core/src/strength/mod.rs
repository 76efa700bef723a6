//! Review-strength formulas.
//!
//! Every function here is pure and infallible: sensitivity is clamped to
//! [1, 3], the final interval has a floor and a cap, so all arithmetic
//! stays finite by construction.

use crate::domain::{Anomaly, ReviewAction, ReviewRecord};

/// How many trailing records feed the average-dwell window.
const DWELL_WINDOW: usize = 3;

/// How many trailing records feed anomaly detection.
const ANOMALY_WINDOW: usize = 5;

/// Hard ceiling on a computed interval (ten years). Unreachable for any
/// realistic virtual count; keeps the instant arithmetic finite even if a
/// caller feeds a pathological state.
pub const MAX_INTERVAL_MS: i64 = 10 * 365 * 24 * 60 * 60 * 1000;

/// Virtual-count update `N' = f(N, a)`, floored at zero.
pub fn virtual_count_after(virtual_count: f64, action: ReviewAction) -> f64 {
    let next = match action {
        ReviewAction::SwipeNext => virtual_count + 1.0,
        ReviewAction::ShowMeaning => virtual_count + 0.5,
        ReviewAction::MarkDifficult => {
            if virtual_count > 2.0 {
                virtual_count - 2.0
            } else {
                0.0
            }
        }
    };
    next.max(0.0)
}

/// Sensitivity `S' = clamp(tanh(N'/n' - 1) + 2, 1, 3)`.
///
/// `actual_count == 0` only occurs for the pre-first-review placeholder and
/// yields 1.0.
pub fn sensitivity(virtual_count: f64, actual_count: u32) -> f64 {
    if actual_count == 0 {
        return 1.0;
    }
    let ratio = virtual_count / actual_count as f64;
    ((ratio - 1.0).tanh() + 2.0).clamp(1.0, 3.0)
}

/// Base interval `t_base = base_ms * S'^{N'}` in double precision.
pub fn base_interval_ms(base_ms: i64, sensitivity: f64, virtual_count: f64) -> f64 {
    base_ms as f64 * sensitivity.powf(virtual_count)
}

/// Mean dwell over the last `min(3, len)` records; 0.0 when there are none.
pub fn average_dwell(history: &[ReviewRecord]) -> f64 {
    let window = history.len().min(DWELL_WINDOW);
    if window == 0 {
        return 0.0;
    }
    let tail = &history[history.len() - window..];
    tail.iter().map(|r| r.dwell_millis as f64).sum::<f64>() / window as f64
}

/// Dwell factor `alpha = dwell / avg`, or 1.0 with no usable average.
pub fn dwell_factor(dwell_millis: i64, average_dwell: f64) -> f64 {
    if average_dwell > 0.0 {
        dwell_millis as f64 / average_dwell
    } else {
        1.0
    }
}

/// Final interval `t = max(t_base / alpha, min_ms)`, capped at
/// [`MAX_INTERVAL_MS`].
pub fn final_interval_ms(base_interval_ms: f64, dwell_factor: f64, min_ms: i64) -> i64 {
    let scaled = base_interval_ms / dwell_factor;
    let bounded = scaled.max(min_ms as f64).min(MAX_INTERVAL_MS as f64);
    debug_assert!(bounded.is_finite());
    bounded.round() as i64
}

/// Scan the last `min(5, len)` records for suspicious input patterns.
pub fn detect_anomaly(history: &[ReviewRecord], accidental_threshold_ms: i64) -> Anomaly {
    let window = history.len().min(ANOMALY_WINDOW);
    if window == 0 {
        return Anomaly::None;
    }
    let tail = &history[history.len() - window..];

    let accidental = tail
        .iter()
        .filter(|r| r.is_accidental(accidental_threshold_ms))
        .count();
    if accidental >= 3 {
        return Anomaly::FrequentAccidents;
    }

    let mean = tail.iter().map(|r| r.dwell_millis as f64).sum::<f64>() / window as f64;
    let variance = tail
        .iter()
        .map(|r| {
            let d = r.dwell_millis as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / window as f64;
    if variance.sqrt() > 0.5 * mean {
        return Anomaly::HighVariance;
    }

    Anomaly::None
}
