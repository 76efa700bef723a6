//! Touch-event classification.
//!
//! Maps raw touch events to exactly one review action per completed
//! gesture. State lives only across a single tap window and resets after
//! every emitted classification.

use crate::config::CoreConfig;
use crate::domain::ReviewAction;
use chrono::{DateTime, Duration, Utc};

/// Raw input as delivered by the (excluded) UI layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    Down {
        x: f32,
        y: f32,
        at: DateTime<Utc>,
    },
    Up {
        x: f32,
        y: f32,
        at: DateTime<Utc>,
    },
    /// A completed fling with total travel and velocity.
    Fling {
        delta_x: f32,
        delta_y: f32,
        velocity_x: f32,
        velocity_y: f32,
        at: DateTime<Utc>,
    },
}

#[derive(Debug)]
pub struct GestureClassifier {
    double_tap_window: Duration,
    long_press_min: Duration,
    fling_min_distance: f32,
    fling_min_velocity: f32,

    /// When the finger went down, if it is currently down.
    press_started: Option<DateTime<Utc>>,
    /// A completed tap waiting to learn whether it pairs into a double-tap.
    pending_tap: Option<DateTime<Utc>>,
}

impl GestureClassifier {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            double_tap_window: Duration::milliseconds(config.double_tap_threshold_ms),
            long_press_min: Duration::milliseconds(config.long_press_threshold_ms),
            fling_min_distance: config.fling_min_distance_px,
            fling_min_velocity: config.fling_min_velocity,
            press_started: None,
            pending_tap: None,
        }
    }

    /// Feed one raw event. At most one action is emitted per call; a tap
    /// that may still pair into a double-tap is held until the window
    /// closes (see [`flush`](Self::flush)).
    pub fn on_event(&mut self, event: &TouchEvent) -> Option<ReviewAction> {
        match *event {
            TouchEvent::Down { at, .. } => {
                self.press_started = Some(at);
                // A tap whose window already closed is confirmed single.
                if self.tap_window_closed(at) {
                    self.pending_tap = None;
                    return Some(ReviewAction::ShowMeaning);
                }
                None
            }
            TouchEvent::Up { at, .. } => {
                let pressed_at = self.press_started.take()?;
                if at - pressed_at >= self.long_press_min {
                    self.reset();
                    return Some(ReviewAction::MarkDifficult);
                }
                // A short press is a tap; pair or hold it.
                match self.pending_tap.take() {
                    Some(first) if at - first <= self.double_tap_window => {
                        self.reset();
                        Some(ReviewAction::MarkDifficult)
                    }
                    Some(_) => {
                        // Window missed: the first tap stands alone and the
                        // new one opens a fresh window.
                        self.pending_tap = Some(at);
                        Some(ReviewAction::ShowMeaning)
                    }
                    None => {
                        self.pending_tap = Some(at);
                        None
                    }
                }
            }
            TouchEvent::Fling {
                delta_x,
                delta_y,
                velocity_x,
                velocity_y,
                ..
            } => {
                let (delta, velocity) = if delta_x.abs() >= delta_y.abs() {
                    (delta_x.abs(), velocity_x.abs())
                } else {
                    (delta_y.abs(), velocity_y.abs())
                };
                if delta > self.fling_min_distance && velocity > self.fling_min_velocity {
                    self.reset();
                    Some(ReviewAction::SwipeNext)
                } else {
                    None
                }
            }
        }
    }

    /// Confirm a pending single tap once its double-tap window has closed.
    /// Call on a timer or before consuming the next gesture.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<ReviewAction> {
        if self.tap_window_closed(now) {
            self.pending_tap = None;
            return Some(ReviewAction::ShowMeaning);
        }
        None
    }

    fn tap_window_closed(&self, now: DateTime<Utc>) -> bool {
        self.pending_tap
            .is_some_and(|tap| now - tap > self.double_tap_window)
    }

    fn reset(&mut self) {
        self.press_started = None;
        self.pending_tap = None;
    }
}
