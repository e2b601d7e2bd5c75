//! Recommendation queue.
//!
//! A mutable ordered sequence of item ids with a cursor, owned exclusively
//! by one session. Promoted and imported items are pushed to position 0
//! (stack-style) so the session switches to them on the next advance. All
//! operations are non-blocking.

use chrono::{DateTime, Utc};

use crate::types::{Item, ItemId};

/// Ordered queue of item ids with a cursor and pause flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationQueue {
    ids: Vec<ItemId>,
    current_index: usize,
    is_paused: bool,
}

impl RecommendationQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial queue from every item due at `now`, ascending by
    /// next_review_time (ties broken by id), cursor at the front.
    pub fn build_initial(items: &[Item], now: DateTime<Utc>) -> Self {
        let mut due: Vec<&Item> = items.iter().filter(|i| i.is_due(now)).collect();
        due.sort_by(|a, b| {
            a.next_review_time
                .cmp(&b.next_review_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            ids: due.into_iter().map(|i| i.id.clone()).collect(),
            current_index: 0,
            is_paused: false,
        }
    }

    /// The id under the cursor, if the cursor is on an element.
    pub fn current(&self) -> Option<&ItemId> {
        self.ids.get(self.current_index)
    }

    /// Move the cursor forward. Returns false when already at (or past) the
    /// last element.
    pub fn advance(&mut self) -> bool {
        if self.current_index + 1 < self.ids.len() {
            self.current_index += 1;
            true
        } else {
            false
        }
    }

    /// Insert an id at position 0. Ids already present are ignored.
    ///
    /// The cursor keeps pointing at the same element; snapping to the new
    /// head is the session's move_to_next decision.
    pub fn add_item(&mut self, id: impl Into<ItemId>) -> bool {
        let id = id.into();
        if self.ids.contains(&id) {
            return false;
        }
        let was_occupied = !self.ids.is_empty();
        self.ids.insert(0, id);
        if was_occupied {
            self.current_index += 1;
        }
        true
    }

    /// Remove an id, preserving the order of the rest. The cursor is pulled
    /// back when it pointed past the removed position.
    pub fn remove_item(&mut self, id: &str) -> bool {
        let Some(pos) = self.ids.iter().position(|x| x == id) else {
            return false;
        };
        self.ids.remove(pos);
        if pos < self.current_index {
            self.current_index -= 1;
        }
        true
    }

    /// Stably reorder the ids by the looked-up next_review_time; ids the
    /// lookup does not know sort last. The cursor index is left untouched.
    pub fn sort_by_next_review<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<DateTime<Utc>>,
    {
        self.ids
            .sort_by_key(|id| lookup(id).unwrap_or(DateTime::<Utc>::MAX_UTC));
    }

    /// Reset the cursor to the head.
    pub fn wrap_to_start(&mut self) {
        self.current_index = 0;
    }

    /// Pause the queue.
    pub fn pause(&mut self) {
        self.is_paused = true;
    }

    /// Resume the queue.
    pub fn resume(&mut self) {
        self.is_paused = false;
    }

    /// Whether the queue is paused.
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    /// Whether the id is queued.
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|x| x == id)
    }

    /// Number of queued ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The queued ids in order.
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    /// The cursor position.
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// The id at the head of the queue.
    pub fn head(&self) -> Option<&ItemId> {
        self.ids.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn item(id: &str, due_ms: i64) -> Item {
        Item::new(id, "w", "m", 1, at(due_ms))
    }

    #[test]
    fn test_build_initial_filters_and_sorts() {
        let items = vec![
            item("000003", 900),
            item("000001", 100),
            item("000002", 50_000),
            item("000004", 900),
        ];
        let queue = RecommendationQueue::build_initial(&items, at(1_000));

        assert_eq!(queue.ids(), ["000001", "000003", "000004"]);
        assert_eq!(queue.current().map(String::as_str), Some("000001"));
    }

    #[test]
    fn test_advance_and_wrap() {
        let items = vec![item("000001", 0), item("000002", 1)];
        let mut queue = RecommendationQueue::build_initial(&items, at(10));

        assert!(queue.advance());
        assert_eq!(queue.current().map(String::as_str), Some("000002"));
        assert!(!queue.advance());

        queue.wrap_to_start();
        assert_eq!(queue.current().map(String::as_str), Some("000001"));
    }

    #[test]
    fn test_add_item_goes_to_head_and_keeps_cursor() {
        let items = vec![item("000001", 0), item("000002", 1)];
        let mut queue = RecommendationQueue::build_initial(&items, at(10));
        queue.advance();

        assert!(queue.add_item("000009"));
        assert_eq!(queue.ids(), ["000009", "000001", "000002"]);
        // Cursor still points at the item being studied.
        assert_eq!(queue.current().map(String::as_str), Some("000002"));
        assert_eq!(queue.head().map(String::as_str), Some("000009"));
    }

    #[test]
    fn test_add_duplicate_ignored() {
        let mut queue = RecommendationQueue::new();
        assert!(queue.add_item("000001"));
        assert!(!queue.add_item("000001"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_add_then_remove_restores_prior_ids() {
        let items = vec![item("000001", 0), item("000002", 1)];
        let mut queue = RecommendationQueue::build_initial(&items, at(10));
        let before: Vec<ItemId> = queue.ids().to_vec();

        queue.add_item("000009");
        queue.remove_item("000009");

        assert_eq!(queue.ids(), before.as_slice());
    }

    #[test]
    fn test_remove_adjusts_cursor() {
        let items = vec![item("000001", 0), item("000002", 1), item("000003", 2)];
        let mut queue = RecommendationQueue::build_initial(&items, at(10));
        queue.advance();
        queue.advance();
        assert_eq!(queue.current().map(String::as_str), Some("000003"));

        // Removing an element before the cursor pulls it back in step.
        queue.remove_item("000001");
        assert_eq!(queue.current().map(String::as_str), Some("000003"));

        // Removing the element under the cursor leaves it past the end.
        queue.remove_item("000003");
        assert_eq!(queue.current(), None);
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut queue = RecommendationQueue::new();
        queue.add_item("000001");
        assert!(!queue.remove_item("000099"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_sort_by_next_review_unknown_last() {
        let mut queue = RecommendationQueue::new();
        queue.add_item("000003");
        queue.add_item("000002");
        queue.add_item("000001");
        // Queue order is now 000001, 000002, 000003.

        queue.sort_by_next_review(|id| match id {
            "000001" => Some(at(5_000)),
            "000002" => Some(at(1_000)),
            _ => None,
        });

        assert_eq!(queue.ids(), ["000002", "000001", "000003"]);
    }

    #[test]
    fn test_pause_resume() {
        let mut queue = RecommendationQueue::new();
        assert!(!queue.is_paused());
        queue.pause();
        assert!(queue.is_paused());
        queue.resume();
        assert!(!queue.is_paused());
    }
}
