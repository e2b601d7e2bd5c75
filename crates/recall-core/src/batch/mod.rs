//! Batch writer: write-behind buffer and crash-safe record log.
//!
//! Reviews are buffered in memory (last write wins per item) and flushed to
//! storage in batches. Every record is appended to the crash log *before*
//! entering the buffer, so a crash between gesture and flush loses nothing.
//! A failed or timed-out flush serializes the whole buffer to the pending
//! snapshot and keeps it for a later retry; the crash log is never truncated
//! on failure. This module is the only path that mutates durable storage.

pub mod recovery;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BatchConfig;
use crate::error::{RecallError, RecallResult};
use crate::traits::{Clock, Storage};
use crate::types::{Item, ItemId, ReviewAction, ReviewRecord};

pub use recovery::{Recovery, RecoveryReport};

/// File name of the append-only crash log.
pub const BACKUP_LOG_FILE: &str = "backup_study_records.json";

/// File name of the pending snapshot written on flush failure.
pub const PENDING_SNAPSHOT_FILE: &str = "pending_updates.json";

/// One line of the crash log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BackupLine {
    #[serde(rename = "itemId")]
    pub item_id: ItemId,
    pub record: WireRecord,
    /// Epoch milliseconds at append time.
    pub timestamp: i64,
}

/// Record fields as they appear inside a crash-log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireRecord {
    #[serde(rename = "reviewTime")]
    pub review_time: i64,
    #[serde(rename = "dwellTime")]
    pub dwell_time: i64,
    pub action: ReviewAction,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl WireRecord {
    fn from_record(record: &ReviewRecord) -> Self {
        Self {
            review_time: record.review_time.timestamp_millis(),
            dwell_time: record.dwell_millis,
            action: record.action,
            session_id: record.session_id.clone(),
        }
    }
}

/// Serialized form of the pending buffer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingSnapshot {
    /// Latest pending item state per id.
    pub updates: HashMap<ItemId, Item>,
    /// Pending records per id, in arrival order.
    pub records: HashMap<ItemId, Vec<ReviewRecord>>,
}

struct PendingState {
    updates: HashMap<ItemId, Item>,
    records: HashMap<ItemId, Vec<ReviewRecord>>,
    last_flush: DateTime<Utc>,
}

impl PendingState {
    fn record_total(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.records.is_empty()
    }

    fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot {
            updates: self.updates.clone(),
            records: self.records.clone(),
        }
    }
}

/// Write-behind batch writer over a [`Storage`] backend.
pub struct BatchWriter {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    config: BatchConfig,
    state: Mutex<PendingState>,
}

impl BatchWriter {
    /// Create a writer. The data directory is created if missing.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, config: BatchConfig) -> Self {
        if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
            warn!("failed to create data dir {:?}: {}", config.data_dir, e);
        }
        let last_flush = clock.now();
        Self {
            storage,
            clock,
            config,
            state: Mutex::new(PendingState {
                updates: HashMap::new(),
                records: HashMap::new(),
                last_flush,
            }),
        }
    }

    /// Path of the crash log.
    pub fn backup_log_path(&self) -> PathBuf {
        self.config.data_dir.join(BACKUP_LOG_FILE)
    }

    /// Path of the pending snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.config.data_dir.join(PENDING_SNAPSHOT_FILE)
    }

    /// Buffer a completed study: the record hits the crash log first, then
    /// both the updated item and the record enter the write-behind buffer.
    pub async fn enqueue(&self, item: Item, record: ReviewRecord) -> RecallResult<()> {
        self.append_crash_log(&item.id, &record).await;

        let mut state = self.state.lock().await;
        state
            .records
            .entry(item.id.clone())
            .or_default()
            .push(record);
        state.updates.insert(item.id.clone(), item);
        self.flush_if_due(&mut state).await
    }

    /// Buffer an item update without a record (imports, metadata edits).
    pub async fn enqueue_update(&self, item: Item) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        state.updates.insert(item.id.clone(), item);
        self.flush_if_due(&mut state).await
    }

    /// Force a flush of everything pending.
    pub async fn flush(&self) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// Number of pending item updates.
    pub async fn pending_update_count(&self) -> usize {
        self.state.lock().await.updates.len()
    }

    /// Number of pending records across all items.
    pub async fn pending_record_count(&self) -> usize {
        self.state.lock().await.record_total()
    }

    /// Force-flush and remove the crash log.
    ///
    /// The only path that truncates the crash log.
    pub async fn cleanup(&self) -> RecallResult<()> {
        self.flush().await?;
        match tokio::fs::remove_file(self.backup_log_path()).await {
            Ok(()) => info!("crash log removed by cleanup"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Spawn the recurring auto-flush task. Abort the handle to stop it.
    pub fn spawn_auto_flush(self: &Arc<Self>) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        let interval = Duration::from_millis(writer.config.auto_flush_interval_ms.max(1) as u64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) = writer.flush().await {
                    warn!("auto-flush failed: {}", e);
                }
            }
        })
    }

    async fn flush_if_due(&self, state: &mut PendingState) -> RecallResult<()> {
        let elapsed_ms = (self.clock.now() - state.last_flush).num_milliseconds();
        let due = elapsed_ms >= self.config.flush_interval_ms
            || state.updates.len() >= self.config.size_threshold
            || state.record_total() >= self.config.size_threshold;
        if due {
            self.flush_locked(state).await
        } else {
            Ok(())
        }
    }

    async fn flush_locked(&self, state: &mut PendingState) -> RecallResult<()> {
        if state.is_empty() {
            state.last_flush = self.clock.now();
            return Ok(());
        }

        let updates = state.updates.len();
        let records = state.record_total();

        match self.write_out(state).await {
            Ok(()) => {
                state.updates.clear();
                state.records.clear();
                state.last_flush = self.clock.now();
                debug!(updates, records, "flushed pending buffer");
                Ok(())
            }
            Err(e) => {
                warn!("flush failed, snapshotting pending buffer: {}", e);
                self.write_snapshot(state).await;
                Err(e)
            }
        }
    }

    async fn write_out(&self, state: &PendingState) -> RecallResult<()> {
        let timeout = Duration::from_millis(self.config.storage_timeout_ms);

        for item in state.updates.values() {
            tokio::time::timeout(timeout, self.storage.put_item(item))
                .await
                .map_err(|_| RecallError::storage_transient("put_item timed out"))??;
        }
        for (id, records) in &state.records {
            for record in records {
                tokio::time::timeout(timeout, self.storage.append_record(id, record))
                    .await
                    .map_err(|_| RecallError::storage_transient("append_record timed out"))??;
            }
        }
        Ok(())
    }

    /// Overwrite the pending snapshot with the entire current buffer.
    async fn write_snapshot(&self, state: &PendingState) {
        let snapshot = state.snapshot();
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(self.snapshot_path(), bytes).await {
                    warn!("failed to write pending snapshot: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize pending snapshot: {}", e),
        }
    }

    /// Append one record to the crash log. Failures are logged and
    /// swallowed; they never interrupt the session.
    async fn append_crash_log(&self, id: &str, record: &ReviewRecord) {
        let line = BackupLine {
            item_id: id.to_string(),
            record: WireRecord::from_record(record),
            timestamp: self.clock.now_millis(),
        };
        let mut bytes = match serde_json::to_vec(&line) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize crash-log line: {}", e);
                return;
            }
        };
        bytes.push(b'\n');

        let written = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.backup_log_path())
            .await
        {
            Ok(mut file) => match file.write_all(&bytes).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("failed to append crash log: {}", e);
        }
    }
}
