//! Durable storage trait.
//!
//! Implementations may be in-memory, file-based, or delegated to a database.
//! The core assumes at-least-once durability on successful return; the batch
//! writer is the only path that calls the mutating methods.

use async_trait::async_trait;

use crate::error::RecallResult;
use crate::types::{Item, ReviewRecord};

/// Durable backing store for items and review records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist an item (insert or overwrite).
    async fn put_item(&self, item: &Item) -> RecallResult<()>;

    /// Append a review record to an item's history.
    async fn append_record(&self, id: &str, record: &ReviewRecord) -> RecallResult<()>;

    /// Load every stored item.
    async fn load_all_items(&self) -> RecallResult<Vec<Item>>;

    /// Load the stored history for an item, oldest first.
    async fn load_history(&self, id: &str) -> RecallResult<Vec<ReviewRecord>>;

    /// Remove an item and its history.
    async fn remove_item(&self, id: &str) -> RecallResult<()>;
}
