//! Review-strength formulas.
//!
//! Pure double-precision math driving the spacing of reviews: the
//! virtual-count update, the sensitivity damping, the exponential base
//! interval, the dwell factor, and anomaly detection over recent records.
//! None of these functions fail; non-finite intermediates collapse to the
//! minimum interval, and sensitivity is clamped to [1, 3] so the exponent
//! stays bounded.

use crate::config::ReviewParams;
use crate::types::{ReviewAction, ReviewRecord};

/// Outcome of scanning recent records for suspicious input patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Nothing unusual.
    None,
    /// Three or more of the recent records were accidental.
    FrequentAccidents,
    /// Dwell times vary wildly (stddev above half the mean).
    HighVariance,
}

/// The review-strength model.
///
/// Wraps the formula parameters; all methods are pure.
#[derive(Debug, Clone)]
pub struct StrengthModel {
    params: ReviewParams,
}

impl StrengthModel {
    /// Create a model with the given parameters.
    pub fn new(params: ReviewParams) -> Self {
        Self { params }
    }

    /// The parameters in use.
    pub fn params(&self) -> &ReviewParams {
        &self.params
    }

    /// Virtual-count update `N' = f(N, action)`, floored at 0.
    ///
    /// `SwipeNext` advances a full step, `ShowMeaning` half a step, and
    /// `MarkDifficult` knocks the count back by two (to zero when the count
    /// is at or below two).
    pub fn virtual_count(&self, n_virtual: f64, action: ReviewAction) -> f64 {
        let next = match action {
            ReviewAction::SwipeNext => n_virtual + 1.0,
            ReviewAction::ShowMeaning => n_virtual + 0.5,
            ReviewAction::MarkDifficult => {
                if n_virtual > 2.0 {
                    n_virtual - 2.0
                } else {
                    0.0
                }
            }
        };
        next.max(0.0)
    }

    /// Sensitivity `S' = clamp(tanh(N'/n' - 1) + 2, 1, 3)`.
    ///
    /// With `n' = 0` (only reachable for the pre-first-review placeholder)
    /// the value is 1.0.
    pub fn sensitivity(&self, n_virtual: f64, n_actual: u32) -> f64 {
        if n_actual == 0 {
            return 1.0;
        }
        let ratio = n_virtual / n_actual as f64;
        ((ratio - 1.0).tanh() + 2.0).clamp(1.0, 3.0)
    }

    /// Base interval `t_base = base_ms * S^N` in milliseconds.
    pub fn base_interval_ms(&self, sensitivity: f64, n_virtual: f64) -> f64 {
        self.params.base_interval_ms as f64 * sensitivity.powf(n_virtual)
    }

    /// Mean dwell over the most recent `min(window, len)` records.
    ///
    /// Returns 0.0 for an empty history, which the dwell factor treats as
    /// "no signal".
    pub fn average_dwell(&self, history: &[ReviewRecord]) -> f64 {
        let window = self.params.recent_dwell_window.min(history.len());
        if window == 0 {
            return 0.0;
        }
        let recent = &history[history.len() - window..];
        let total: i64 = recent.iter().map(|r| r.dwell_millis).sum();
        total as f64 / window as f64
    }

    /// Dwell factor `alpha = dwell / avg`, or 1.0 without an average.
    pub fn dwell_factor(&self, dwell_millis: i64, average_dwell: f64) -> f64 {
        if average_dwell > 0.0 {
            dwell_millis as f64 / average_dwell
        } else {
            1.0
        }
    }

    /// Final interval `t = max(t_base / alpha, floor)` in milliseconds.
    ///
    /// The floor also absorbs non-finite intermediates (alpha of zero,
    /// overflowed exponentials), so the result is always a usable interval.
    pub fn interval_ms(&self, base_interval_ms: f64, dwell_factor: f64) -> i64 {
        let floor = self.params.min_interval_ms as f64;
        let raw = base_interval_ms / dwell_factor;
        if !raw.is_finite() {
            return self.params.min_interval_ms;
        }
        raw.max(floor) as i64
    }

    /// Scan the last `min(anomaly_window, len)` records for input anomalies.
    pub fn detect_anomaly(&self, history: &[ReviewRecord]) -> Anomaly {
        let window = self.params.anomaly_window.min(history.len());
        if window == 0 {
            return Anomaly::None;
        }
        let recent = &history[history.len() - window..];

        let accidental = recent
            .iter()
            .filter(|r| r.is_accidental(self.params.accidental_threshold_ms))
            .count();
        if accidental >= 3 {
            return Anomaly::FrequentAccidents;
        }

        let mean = recent.iter().map(|r| r.dwell_millis as f64).sum::<f64>() / window as f64;
        if mean > 0.0 {
            let variance = recent
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
        }

        Anomaly::None
    }
}

impl Default for StrengthModel {
    fn default() -> Self {
        Self::new(ReviewParams::default())
    }
}
