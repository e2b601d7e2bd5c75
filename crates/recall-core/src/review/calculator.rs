//! Next-review calculator.
//!
//! Composes the strength formulas into a single item update. `history` is
//! the item's prior records, oldest first, excluding the record being
//! applied.

use chrono::Duration;
use tracing::debug;

use crate::config::ReviewParams;
use crate::review::StrengthModel;
use crate::types::{Item, ReviewRecord};

/// Computes the post-review state of an item.
#[derive(Debug, Clone, Default)]
pub struct ReviewCalculator {
    model: StrengthModel,
}

impl ReviewCalculator {
    /// Create a calculator with the given formula parameters.
    pub fn new(params: ReviewParams) -> Self {
        Self {
            model: StrengthModel::new(params),
        }
    }

    /// The underlying strength model.
    pub fn model(&self) -> &StrengthModel {
        &self.model
    }

    /// Apply one review record to an item.
    ///
    /// Returns a new item with the virtual count, actual count, sensitivity,
    /// and next review time advanced; all other fields unchanged. Never
    /// fails: degenerate arithmetic lands on the minimum interval.
    pub fn compute_update(
        &self,
        item: &Item,
        record: &ReviewRecord,
        history: &[ReviewRecord],
    ) -> Item {
        let n_virtual = self.model.virtual_count(item.virtual_review_count, record.action);
        let n_actual = item.actual_review_count + 1;
        let sensitivity = self.model.sensitivity(n_virtual, n_actual);

        let base = self.model.base_interval_ms(sensitivity, n_virtual);
        let avg = self.model.average_dwell(history);
        let alpha = self.model.dwell_factor(record.dwell_millis, avg);
        let interval_ms = self.model.interval_ms(base, alpha);

        debug!(
            item_id = %item.id,
            action = record.action.label(),
            n_virtual,
            n_actual,
            sensitivity,
            interval_ms,
            "computed review update"
        );

        let mut updated = item.clone();
        updated.virtual_review_count = n_virtual;
        updated.actual_review_count = n_actual;
        updated.sensitivity = sensitivity;
        updated.next_review_time = record.review_time + Duration::milliseconds(interval_ms);
        updated
    }
}
