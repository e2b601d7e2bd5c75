//! SQLite storage backend.
//!
//! The default durable store for desktop builds. Items live in one table,
//! review records in another; timestamps are stored as epoch milliseconds so
//! the on-disk values match the wire formats. rusqlite is a synchronous
//! driver, so every trait method runs its queries on the blocking pool via
//! `spawn_blocking` rather than on a runtime worker.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, Connection};

use crate::error::{RecallError, RecallResult};
use crate::traits::Storage;
use crate::types::{Item, ReviewAction, ReviewRecord};

/// SQLite-backed [`Storage`] implementation.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> RecallResult<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> RecallResult<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> RecallResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS items (
                id                   TEXT PRIMARY KEY,
                word                 TEXT NOT NULL,
                meaning              TEXT NOT NULL,
                level                INTEGER NOT NULL DEFAULT 0,
                virtual_review_count REAL NOT NULL DEFAULT 0,
                actual_review_count  INTEGER NOT NULL DEFAULT 0,
                sensitivity          REAL NOT NULL DEFAULT 1.0,
                next_review_time     INTEGER NOT NULL,
                created_at           INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS review_records (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id     TEXT NOT NULL,
                review_time INTEGER NOT NULL,
                dwell_ms    INTEGER NOT NULL,
                action      TEXT NOT NULL,
                session_id  TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_items_next_review ON items(next_review_time);
            CREATE INDEX IF NOT EXISTS idx_records_item_id ON review_records(item_id);
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> RecallResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RecallError::internal(format!("sqlite lock poisoned: {}", e)))
    }

    /// Run a query closure on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> RecallResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> RecallResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| RecallError::internal(format!("sqlite lock poisoned: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| RecallError::internal(format!("sqlite worker task failed: {}", e)))?
    }

    /// Number of stored items.
    pub fn item_count(&self) -> RecallResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
        let next_review_ms: i64 = row.get(7)?;
        let created_ms: i64 = row.get(8)?;
        Ok(Item {
            id: row.get(0)?,
            word: row.get(1)?,
            meaning: row.get(2)?,
            level: row.get(3)?,
            virtual_review_count: row.get(4)?,
            actual_review_count: row.get(5)?,
            sensitivity: row.get(6)?,
            next_review_time: DateTime::from_timestamp_millis(next_review_ms)
                .unwrap_or_default(),
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        })
    }

    fn action_from_str(s: &str) -> RecallResult<ReviewAction> {
        match s {
            "SWIPE_NEXT" => Ok(ReviewAction::SwipeNext),
            "SHOW_MEANING" => Ok(ReviewAction::ShowMeaning),
            "MARK_DIFFICULT" => Ok(ReviewAction::MarkDifficult),
            other => Err(RecallError::parse(format!("unknown action '{}'", other))),
        }
    }

    fn action_to_str(action: ReviewAction) -> &'static str {
        match action {
            ReviewAction::SwipeNext => "SWIPE_NEXT",
            ReviewAction::ShowMeaning => "SHOW_MEANING",
            ReviewAction::MarkDifficult => "MARK_DIFFICULT",
        }
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn put_item(&self, item: &Item) -> RecallResult<()> {
        let item = item.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO items
                 (id, word, meaning, level, virtual_review_count, actual_review_count,
                  sensitivity, next_review_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    item.id,
                    item.word,
                    item.meaning,
                    item.level,
                    item.virtual_review_count,
                    item.actual_review_count,
                    item.sensitivity,
                    item.next_review_time.timestamp_millis(),
                    item.created_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_record(&self, id: &str, record: &ReviewRecord) -> RecallResult<()> {
        let id = id.to_string();
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO review_records (item_id, review_time, dwell_ms, action, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id,
                    record.review_time.timestamp_millis(),
                    record.dwell_millis,
                    Self::action_to_str(record.action),
                    record.session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_all_items(&self) -> RecallResult<Vec<Item>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, word, meaning, level, virtual_review_count, actual_review_count,
                        sensitivity, next_review_time, created_at
                 FROM items ORDER BY id ASC",
            )?;
            let items = stmt
                .query_map([], Self::row_to_item)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(items)
        })
        .await
    }

    async fn load_history(&self, id: &str) -> RecallResult<Vec<ReviewRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item_id, review_time, dwell_ms, action, session_id
                 FROM review_records WHERE item_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([id], |row| {
                let item_id: String = row.get(0)?;
                let review_ms: i64 = row.get(1)?;
                let dwell_ms: i64 = row.get(2)?;
                let action: String = row.get(3)?;
                let session_id: Option<String> = row.get(4)?;
                Ok((item_id, review_ms, dwell_ms, action, session_id))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (item_id, review_ms, dwell_ms, action, session_id) = row?;
                records.push(ReviewRecord {
                    item_id,
                    dwell_millis: dwell_ms,
                    review_time: DateTime::from_timestamp_millis(review_ms)
                        .unwrap_or_default(),
                    action: Self::action_from_str(&action)?,
                    session_id,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn remove_item(&self, id: &str) -> RecallResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM items WHERE id = ?1", params![id])?;
            conn.execute(
                "DELETE FROM review_records WHERE item_id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn apple(now: chrono::DateTime<Utc>) -> Item {
        Item::new("000001", "apple", "苹果", 1, now)
    }

    #[tokio::test]
    async fn test_item_round_trip() {
        let storage = SqliteStorage::in_memory().unwrap();
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let mut item = apple(now);
        item.virtual_review_count = 1.5;
        item.actual_review_count = 2;
        item.sensitivity = 1.755;

        storage.put_item(&item).await.unwrap();
        let loaded = storage.load_all_items().await.unwrap();
        assert_eq!(loaded, vec![item]);
    }

    #[tokio::test]
    async fn test_put_item_overwrites() {
        let storage = SqliteStorage::in_memory().unwrap();
        let now = Utc::now();
        let mut item = apple(now);

        storage.put_item(&item).await.unwrap();
        item.virtual_review_count = 3.0;
        storage.put_item(&item).await.unwrap();

        let loaded = storage.load_all_items().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].virtual_review_count, 3.0);
    }

    #[tokio::test]
    async fn test_history_preserves_order_and_action() {
        let storage = SqliteStorage::in_memory().unwrap();
        let now = DateTime::from_timestamp_millis(10_000).unwrap();

        for (dwell, action) in [
            (300, ReviewAction::ShowMeaning),
            (800, ReviewAction::SwipeNext),
            (450, ReviewAction::MarkDifficult),
        ] {
            let record =
                ReviewRecord::new("000001", dwell, now, action, Some("s1".to_string()));
            storage.append_record("000001", &record).await.unwrap();
        }

        let history = storage.load_history("000001").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].action, ReviewAction::ShowMeaning);
        assert_eq!(history[2].action, ReviewAction::MarkDifficult);
        assert_eq!(history[1].dwell_millis, 800);
        assert_eq!(history[0].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_remove_item_cascades() {
        let storage = SqliteStorage::in_memory().unwrap();
        let now = Utc::now();
        storage.put_item(&apple(now)).await.unwrap();
        let record = ReviewRecord::new("000001", 500, now, ReviewAction::SwipeNext, None);
        storage.append_record("000001", &record).await.unwrap();

        storage.remove_item("000001").await.unwrap();
        assert_eq!(storage.item_count().unwrap(), 0);
        assert!(storage.load_history("000001").await.unwrap().is_empty());
    }
}
