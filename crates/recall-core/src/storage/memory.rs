//! In-memory storage backend.
//!
//! Useful for tests and ephemeral sessions. Also supports fault injection
//! so the batch writer's snapshot path can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{RecallError, RecallResult};
use crate::traits::Storage;
use crate::types::{Item, ItemId, ReviewRecord};

#[derive(Default)]
struct Tables {
    items: HashMap<ItemId, Item>,
    records: HashMap<ItemId, Vec<ReviewRecord>>,
}

/// In-memory [`Storage`] implementation.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a transient error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored items.
    pub async fn item_count(&self) -> usize {
        self.tables.read().await.items.len()
    }

    /// Number of stored records across all items.
    pub async fn record_count(&self) -> usize {
        self.tables.read().await.records.values().map(Vec::len).sum()
    }

    fn check_writable(&self) -> RecallResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RecallError::storage_transient(
                "memory storage writes disabled",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put_item(&self, item: &Item) -> RecallResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .items
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn append_record(&self, id: &str, record: &ReviewRecord) -> RecallResult<()> {
        self.check_writable()?;
        self.tables
            .write()
            .await
            .records
            .entry(id.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_all_items(&self) -> RecallResult<Vec<Item>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Item> = tables.items.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn load_history(&self, id: &str) -> RecallResult<Vec<ReviewRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .records
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_item(&self, id: &str) -> RecallResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.items.remove(id);
        tables.records.remove(id);
        Ok(())
    }
}
