//! Item store and cache.
//!
//! Owns the authoritative in-memory item map, an LRU of hot items, an LRU of
//! per-item review histories, and the due-time index. The map, caches, and
//! index are guarded by a single lock so every mutation updates them
//! atomically. History misses fall through to the underlying [`Storage`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::RecallResult;
use crate::traits::Storage;
use crate::types::{IdCounter, Item, ItemId, ReviewRecord};

struct StoreInner {
    /// Authoritative map of every known item.
    items: HashMap<ItemId, Item>,
    /// Fast path for recently touched items.
    hot: LruCache<ItemId, Item>,
    /// Recently touched per-item histories, oldest record first.
    histories: LruCache<ItemId, Vec<ReviewRecord>>,
    /// next_review_time -> ids due at that instant.
    due_index: BTreeMap<DateTime<Utc>, BTreeSet<ItemId>>,
}

impl StoreInner {
    fn index_insert(&mut self, at: DateTime<Utc>, id: &str) {
        self.due_index.entry(at).or_default().insert(id.to_string());
    }

    fn index_remove(&mut self, at: DateTime<Utc>, id: &str) {
        if let Some(ids) = self.due_index.get_mut(&at) {
            ids.remove(id);
            if ids.is_empty() {
                self.due_index.remove(&at);
            }
        }
    }
}

/// Cache-fronted store of study items and their review histories.
pub struct ItemStore {
    storage: Arc<dyn Storage>,
    config: CacheConfig,
    ids: IdCounter,
    inner: RwLock<StoreInner>,
}

impl ItemStore {
    /// Create a store over the given backing storage.
    pub fn new(storage: Arc<dyn Storage>, config: CacheConfig) -> Self {
        let hot_cap = NonZeroUsize::new(config.hot_capacity.max(1)).unwrap();
        let history_cap = NonZeroUsize::new(config.history_capacity.max(1)).unwrap();
        Self {
            storage,
            config,
            ids: IdCounter::new(),
            inner: RwLock::new(StoreInner {
                items: HashMap::new(),
                hot: LruCache::new(hot_cap),
                histories: LruCache::new(history_cap),
                due_index: BTreeMap::new(),
            }),
        }
    }

    /// Hydrate the authoritative map and due-time index from storage.
    ///
    /// Also advances the id counter past every loaded numeric id. Returns
    /// the number of items loaded.
    pub async fn load_from_storage(&self) -> RecallResult<usize> {
        let items = self.storage.load_all_items().await?;
        let mut inner = self.inner.write().await;
        inner.items.clear();
        inner.hot.clear();
        inner.due_index.clear();
        for item in items {
            self.ids.observe(&item.id);
            inner.index_insert(item.next_review_time, &item.id);
            inner.items.insert(item.id.clone(), item);
        }
        let count = inner.items.len();
        debug!(count, "item store hydrated from storage");
        Ok(count)
    }

    /// Issue the next item id from the store-owned counter.
    pub fn next_id(&self) -> RecallResult<ItemId> {
        self.ids.next_id()
    }

    /// Position the id counter (persisted across restarts by the caller).
    pub fn seed_id_counter(&self, next: u32) {
        self.ids.observe(&format!("{:06}", next.saturating_sub(1)));
    }

    /// The next id the counter would issue.
    pub fn id_counter_position(&self) -> u32 {
        self.ids.peek()
    }

    /// Add a new item to the store.
    ///
    /// Numeric ids advance the id counter so counter-issued ids never
    /// collide with externally supplied ones.
    pub async fn add_item(&self, item: Item) {
        self.ids.observe(&item.id);
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.items.get(&item.id) {
            let old_time = old.next_review_time;
            inner.index_remove(old_time, &item.id);
        }
        inner.index_insert(item.next_review_time, &item.id);
        inner.hot.put(item.id.clone(), item.clone());
        inner.items.insert(item.id.clone(), item);
    }

    /// Get an item by id, promoting it into the hot cache.
    pub async fn get_item(&self, id: &str) -> Option<Item> {
        let mut inner = self.inner.write().await;
        if let Some(item) = inner.hot.get(id) {
            return Some(item.clone());
        }
        if let Some(item) = inner.items.get(id).cloned() {
            inner.hot.put(id.to_string(), item.clone());
            return Some(item);
        }
        None
    }

    /// Replace an item, keeping the due-time index in sync.
    pub async fn update_item(&self, item: Item) {
        self.add_item(item).await;
    }

    /// Remove an item from the map, caches, and index.
    pub async fn remove_item(&self, id: &str) -> Option<Item> {
        let mut inner = self.inner.write().await;
        let removed = inner.items.remove(id);
        if let Some(ref item) = removed {
            let at = item.next_review_time;
            inner.index_remove(at, id);
        }
        inner.hot.pop(id);
        inner.histories.pop(id);
        removed
    }

    /// All items, sorted by id ascending.
    pub async fn all_items(&self) -> Vec<Item> {
        let inner = self.inner.read().await;
        let mut items: Vec<Item> = inner.items.values().cloned().collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Number of items in the authoritative map.
    pub async fn item_count(&self) -> usize {
        self.inner.read().await.items.len()
    }

    /// Review history for an item, oldest first, at most the configured cap.
    ///
    /// A cache miss falls through to storage and populates the history LRU.
    pub async fn get_history(&self, id: &str) -> RecallResult<Vec<ReviewRecord>> {
        {
            let mut inner = self.inner.write().await;
            if let Some(history) = inner.histories.get(id) {
                return Ok(history.clone());
            }
        }

        let mut loaded = self.storage.load_history(id).await?;
        let cap = self.config.history_max_per_item;
        if loaded.len() > cap {
            loaded.drain(..loaded.len() - cap);
        }

        let mut inner = self.inner.write().await;
        inner.histories.put(id.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Append a record to an item's cached history, dropping the oldest past
    /// the per-item cap.
    pub async fn add_record(&self, id: &str, record: ReviewRecord) -> RecallResult<()> {
        // Load-through first so a cold history does not lose its tail.
        let mut history = self.get_history(id).await?;
        history.push(record);
        if history.len() > self.config.history_max_per_item {
            let overflow = history.len() - self.config.history_max_per_item;
            history.drain(..overflow);
        }
        let mut inner = self.inner.write().await;
        inner.histories.put(id.to_string(), history);
        Ok(())
    }

    /// Ids of items due at `now`, ascending by next_review_time, ties broken
    /// by id ascending.
    pub async fn due_item_ids(&self, now: DateTime<Utc>) -> Vec<ItemId> {
        let inner = self.inner.read().await;
        inner
            .due_index
            .range(..=now)
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Earliest next_review_time strictly after `now`, if any.
    pub async fn next_due_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner
            .due_index
            .range((
                std::ops::Bound::Excluded(now),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(at, _)| *at)
    }

    /// (total items, items due at `now`) for recovery validation.
    pub async fn counts(&self, now: DateTime<Utc>) -> (usize, usize) {
        let inner = self.inner.read().await;
        let due = inner
            .due_index
            .range(..=now)
            .map(|(_, ids)| ids.len())
            .sum();
        (inner.items.len(), due)
    }
}
