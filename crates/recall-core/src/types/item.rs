//! Study item model and the process-wide item id counter.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RecallError, RecallResult};

/// Stable opaque item identifier (zero-padded 6-digit decimal).
pub type ItemId = String;

/// Highest issuable item id.
pub const MAX_ITEM_ID: u32 = 999_999;

/// A study item: a unit of content paired with a meaning, plus the
/// review-strength state that drives its scheduling.
///
/// Invariants maintained by every update path:
/// `virtual_review_count >= 0`, `actual_review_count >= 0`,
/// `1.0 <= sensitivity <= 3.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable opaque identifier.
    pub id: ItemId,
    /// Display text of the content being memorized.
    pub word: String,
    /// Display text of the meaning.
    pub meaning: String,
    /// Difficulty tag, informational only.
    pub level: i32,
    /// Virtual review count N: real-valued running score updated by action.
    pub virtual_review_count: f64,
    /// Actual review count n: non-accidental gestures applied to the item.
    pub actual_review_count: u32,
    /// Sensitivity S in [1, 3]: per-item damping of the N/n ratio.
    pub sensitivity: f64,
    /// Next instant the item becomes due.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub next_review_time: DateTime<Utc>,
    /// Creation instant.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Create a new item, immediately due.
    ///
    /// New items start with `N = 0`, `n = 0`, `S = 1`, and
    /// `next_review_time = now`.
    pub fn new(
        id: impl Into<ItemId>,
        word: impl Into<String>,
        meaning: impl Into<String>,
        level: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            word: word.into(),
            meaning: meaning.into(),
            level,
            virtual_review_count: 0.0,
            actual_review_count: 0,
            sensitivity: 1.0,
            next_review_time: now,
            created_at: now,
        }
    }

    /// Whether the item is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_time <= now
    }
}

/// Process-wide monotonic counter issuing item ids.
///
/// Held by the item store rather than a free-floating static; the current
/// position can be seeded at startup to persist across restarts.
#[derive(Debug)]
pub struct IdCounter {
    next: AtomicU32,
}

impl IdCounter {
    /// Create a counter starting at id 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Create a counter whose next issued id is `next`.
    pub fn starting_at(next: u32) -> Self {
        Self {
            next: AtomicU32::new(next.max(1)),
        }
    }

    /// Issue the next id, zero-padded to six digits.
    ///
    /// Fails with `DuplicateItemId` once the id space is exhausted.
    pub fn next_id(&self) -> RecallResult<ItemId> {
        let value = self.next.fetch_add(1, Ordering::SeqCst);
        if value > MAX_ITEM_ID {
            // Park the counter past the ceiling so later calls keep failing.
            self.next.store(MAX_ITEM_ID + 1, Ordering::SeqCst);
            return Err(RecallError::DuplicateItemId {
                id: format!("{:06}", MAX_ITEM_ID),
            });
        }
        Ok(format!("{:06}", value))
    }

    /// The next id that would be issued (for persisting across restarts).
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }

    /// Advance the counter past `id` if it is a known numeric id.
    ///
    /// Used when hydrating from storage so freshly issued ids never collide
    /// with loaded ones.
    pub fn observe(&self, id: &str) {
        if let Ok(n) = id.parse::<u32>() {
            self.next.fetch_max(n + 1, Ordering::SeqCst);
        }
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_immediately_due() {
        let now = Utc::now();
        let item = Item::new("000001", "apple", "苹果", 1, now);

        assert_eq!(item.virtual_review_count, 0.0);
        assert_eq!(item.actual_review_count, 0);
        assert_eq!(item.sensitivity, 1.0);
        assert_eq!(item.next_review_time, now);
        assert!(item.is_due(now));
    }

    #[test]
    fn test_item_serde_wire_format() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let item = Item::new("000001", "apple", "苹果", 2, now);

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["id"], "000001");
        assert_eq!(value["virtualReviewCount"], 0.0);
        assert_eq!(value["actualReviewCount"], 0);
        assert_eq!(value["nextReviewTime"], 1_700_000_000_000_i64);
        assert_eq!(value["createdAt"], 1_700_000_000_000_i64);

        let back: Item = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn test_id_counter_monotonic_and_padded() {
        let counter = IdCounter::new();
        assert_eq!(counter.next_id().unwrap(), "000001");
        assert_eq!(counter.next_id().unwrap(), "000002");
    }

    #[test]
    fn test_id_counter_seeded() {
        let counter = IdCounter::starting_at(42);
        assert_eq!(counter.next_id().unwrap(), "000042");
    }

    #[test]
    fn test_id_counter_observe_skips_loaded_ids() {
        let counter = IdCounter::new();
        counter.observe("000100");
        assert_eq!(counter.next_id().unwrap(), "000101");

        // Lower ids do not move the counter backwards.
        counter.observe("000005");
        assert_eq!(counter.next_id().unwrap(), "000102");
    }

    #[test]
    fn test_id_counter_exhaustion() {
        let counter = IdCounter::starting_at(MAX_ITEM_ID);
        assert_eq!(counter.next_id().unwrap(), "999999");
        assert!(matches!(
            counter.next_id(),
            Err(RecallError::DuplicateItemId { .. })
        ));
        // Stays exhausted.
        assert!(counter.next_id().is_err());
    }
}
