//! Review records: the append-only log of classified gestures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ItemId;

/// The classified gesture applied to the current item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    /// Fling in any direction: the learner knows the item, move on.
    SwipeNext,
    /// Single tap: reveal the meaning.
    ShowMeaning,
    /// Double tap or long press: the item is hard, review it sooner.
    MarkDifficult,
}

impl ReviewAction {
    /// Human-readable label for logs and UI summaries.
    pub fn label(&self) -> &'static str {
        match self {
            ReviewAction::SwipeNext => "swipe next",
            ReviewAction::ShowMeaning => "show meaning",
            ReviewAction::MarkDifficult => "mark difficult",
        }
    }
}

/// One completed, classified gesture on an item.
///
/// Records are append-only; per-item history keeps the most recent 200.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// Item the record belongs to.
    #[serde(rename = "itemId")]
    pub item_id: ItemId,
    /// Elapsed wall-clock between study start and the gesture, in ms.
    #[serde(rename = "dwellTime")]
    pub dwell_millis: i64,
    /// Instant the gesture was classified.
    #[serde(rename = "reviewTime", with = "chrono::serde::ts_milliseconds")]
    pub review_time: DateTime<Utc>,
    /// The classified gesture.
    pub action: ReviewAction,
    /// Session the record was produced in, if any.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl ReviewRecord {
    /// Create a record for an item.
    pub fn new(
        item_id: impl Into<ItemId>,
        dwell_millis: i64,
        review_time: DateTime<Utc>,
        action: ReviewAction,
        session_id: Option<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            dwell_millis: dwell_millis.max(0),
            review_time,
            action,
            session_id,
        }
    }

    /// Whether the record is accidental under the given dwell threshold.
    pub fn is_accidental(&self, threshold_ms: i64) -> bool {
        self.dwell_millis < threshold_ms
    }
}
