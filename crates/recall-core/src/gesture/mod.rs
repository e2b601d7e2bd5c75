//! Gesture classifier.
//!
//! Maps raw touch events to exactly one review action per completed
//! gesture: double-tap or long-press to `MarkDifficult`, a confirmed single
//! tap to `ShowMeaning`, and a fling past the distance and velocity
//! thresholds to `SwipeNext` regardless of direction. State spans a single
//! tap window and resets on every completed classification.
//!
//! A single tap can only be confirmed once the double-tap window has
//! lapsed, so confirmation happens either when a later event arrives or
//! when the caller drains the window via [`GestureClassifier::poll`].

use chrono::{DateTime, Utc};

use crate::config::GestureConfig;
use crate::types::ReviewAction;

/// A raw touch event from the input layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    /// Finger down.
    Down { x: f64, y: f64, at: DateTime<Utc> },
    /// Finger up.
    Up { x: f64, y: f64, at: DateTime<Utc> },
    /// Finger moved while down.
    Move { x: f64, y: f64, at: DateTime<Utc> },
    /// Completed fling with total travel and velocity.
    Fling {
        dx: f64,
        dy: f64,
        velocity_x: f64,
        velocity_y: f64,
        at: DateTime<Utc>,
    },
}

impl TouchEvent {
    fn at(&self) -> DateTime<Utc> {
        match *self {
            TouchEvent::Down { at, .. }
            | TouchEvent::Up { at, .. }
            | TouchEvent::Move { at, .. }
            | TouchEvent::Fling { at, .. } => at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Press {
    at: DateTime<Utc>,
}

/// Stateful classifier of raw touch events into review actions.
#[derive(Debug)]
pub struct GestureClassifier {
    config: GestureConfig,
    press: Option<Press>,
    /// Completion instant of a tap awaiting double-tap confirmation.
    pending_tap: Option<DateTime<Utc>>,
}

impl GestureClassifier {
    /// Create a classifier with the given thresholds.
    pub fn new(config: GestureConfig) -> Self {
        Self {
            config,
            press: None,
            pending_tap: None,
        }
    }

    /// Feed one event; returns the actions completed by it.
    ///
    /// At most two actions can result: a previously pending tap whose
    /// double-tap window lapsed, followed by the classification of this
    /// event.
    pub fn push(&mut self, event: TouchEvent) -> Vec<ReviewAction> {
        let mut out = Vec::new();
        if let Some(action) = self.flush_expired(event.at()) {
            out.push(action);
        }

        match event {
            TouchEvent::Down { at, .. } => {
                self.press = Some(Press { at });
            }
            TouchEvent::Move { .. } => {}
            TouchEvent::Up { at, .. } => {
                if let Some(press) = self.press.take() {
                    let held_ms = (at - press.at).num_milliseconds();
                    if held_ms >= self.config.long_press_ms {
                        self.pending_tap = None;
                        out.push(ReviewAction::MarkDifficult);
                    } else if let Some(prev) = self.pending_tap.take() {
                        // flush_expired kept it, so it is within the window.
                        debug_assert!(
                            (at - prev).num_milliseconds() <= self.config.double_tap_ms
                        );
                        out.push(ReviewAction::MarkDifficult);
                    } else {
                        self.pending_tap = Some(at);
                    }
                }
            }
            TouchEvent::Fling {
                dx,
                dy,
                velocity_x,
                velocity_y,
                ..
            } => {
                self.press = None;
                let (delta, velocity) = if dx.abs() >= dy.abs() {
                    (dx, velocity_x)
                } else {
                    (dy, velocity_y)
                };
                if delta.abs() > self.config.fling_distance_px
                    && velocity.abs() > self.config.fling_velocity_px_s
                {
                    self.pending_tap = None;
                    out.push(ReviewAction::SwipeNext);
                }
            }
        }

        out
    }

    /// Confirm a pending single tap whose double-tap window has lapsed.
    ///
    /// Call periodically (or before reading the session state) so a lone
    /// tap does not linger unclassified.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<ReviewAction> {
        self.flush_expired(now)
    }

    /// Drop any partial gesture state.
    pub fn reset(&mut self) {
        self.press = None;
        self.pending_tap = None;
    }

    fn flush_expired(&mut self, now: DateTime<Utc>) -> Option<ReviewAction> {
        let prev = self.pending_tap?;
        if (now - prev).num_milliseconds() > self.config.double_tap_ms {
            self.pending_tap = None;
            Some(ReviewAction::ShowMeaning)
        } else {
            None
        }
    }
}

impl Default for GestureClassifier {
    fn default() -> Self {
        Self::new(GestureConfig::default())
    }
}
