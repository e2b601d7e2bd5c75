//! Startup recovery.
//!
//! Applies a pending snapshot left by a failed flush, scans the crash log
//! for records that survived a crash, and validates the recovered state.
//! Parse errors are logged and skipped; recovery always continues. The
//! crash log is retained (only `BatchWriter::cleanup` removes it).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::batch::{BackupLine, PendingSnapshot, BACKUP_LOG_FILE, PENDING_SNAPSHOT_FILE};
use crate::error::RecallResult;
use crate::traits::{Clock, Storage};
use crate::types::Item;

/// Memory-usage threshold above which recovery warns, in bytes.
const MEMORY_WARN_BYTES: u64 = 100 * 1024 * 1024;

/// Rough per-item overhead for the memory estimate, in bytes.
const ITEM_OVERHEAD_BYTES: u64 = 256;

/// Statistics from a recovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Item updates applied from the pending snapshot.
    pub updates_applied: usize,
    /// Records applied from the pending snapshot.
    pub records_applied: usize,
    /// Crash-log lines scanned.
    pub backup_lines_scanned: usize,
    /// Crash-log records whose item still exists.
    pub backup_records_matched: usize,
    /// Unparseable snapshot documents or crash-log lines skipped.
    pub parse_errors: usize,
    /// Items in storage after recovery.
    pub total_items: usize,
    /// Items due at recovery time.
    pub due_items: usize,
    /// Rough in-memory footprint of the item set, in bytes.
    pub memory_usage_estimate: u64,
}

/// Startup recovery procedure.
pub struct Recovery {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    data_dir: PathBuf,
}

impl Recovery {
    /// Create a recovery runner over the batch writer's data directory.
    pub fn new(storage: Arc<dyn Storage>, clock: Arc<dyn Clock>, data_dir: PathBuf) -> Self {
        Self {
            storage,
            clock,
            data_dir,
        }
    }

    /// Run the full recovery procedure.
    ///
    /// With no pending snapshot and no crash log this is a no-op apart from
    /// the validation statistics.
    pub async fn run(&self) -> RecallResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        self.apply_pending_snapshot(&mut report).await?;
        self.scan_backup_log(&mut report).await?;
        self.validate(&mut report).await?;

        info!(
            updates = report.updates_applied,
            records = report.records_applied,
            backup_matched = report.backup_records_matched,
            parse_errors = report.parse_errors,
            total = report.total_items,
            due = report.due_items,
            "recovery finished"
        );
        Ok(report)
    }

    async fn apply_pending_snapshot(&self, report: &mut RecoveryReport) -> RecallResult<()> {
        let path = self.data_dir.join(PENDING_SNAPSHOT_FILE);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let snapshot: PendingSnapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("pending snapshot unparseable, skipping: {}", e);
                report.parse_errors += 1;
                return Ok(());
            }
        };

        for item in snapshot.updates.values() {
            self.storage.put_item(item).await?;
            report.updates_applied += 1;
        }
        for (id, records) in &snapshot.records {
            for record in records {
                self.storage.append_record(id, record).await?;
                report.records_applied += 1;
            }
        }

        tokio::fs::remove_file(&path).await?;
        info!(
            updates = report.updates_applied,
            records = report.records_applied,
            "pending snapshot applied and deleted"
        );
        Ok(())
    }

    async fn scan_backup_log(&self, report: &mut RecoveryReport) -> RecallResult<()> {
        let path = self.data_dir.join(BACKUP_LOG_FILE);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        let known_ids: HashSet<String> = self
            .storage
            .load_all_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let content = tokio::fs::read_to_string(&path).await?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            report.backup_lines_scanned += 1;
            match serde_json::from_str::<BackupLine>(line) {
                Ok(parsed) => {
                    if known_ids.contains(&parsed.item_id) {
                        report.backup_records_matched += 1;
                    }
                }
                Err(e) => {
                    warn!("skipping unparseable crash-log line: {}", e);
                    report.parse_errors += 1;
                }
            }
        }
        Ok(())
    }

    async fn validate(&self, report: &mut RecoveryReport) -> RecallResult<()> {
        let items = self.storage.load_all_items().await?;
        let now = self.clock.now();

        report.total_items = items.len();
        report.due_items = items.iter().filter(|i| i.is_due(now)).count();
        report.memory_usage_estimate = items.iter().map(estimate_item_bytes).sum();

        if report.due_items > report.total_items {
            warn!(
                due = report.due_items,
                total = report.total_items,
                "due count exceeds total count"
            );
        }
        if report.memory_usage_estimate > MEMORY_WARN_BYTES {
            warn!(
                estimate = report.memory_usage_estimate,
                "item set estimate exceeds 100 MB"
            );
        }
        Ok(())
    }
}

fn estimate_item_bytes(item: &Item) -> u64 {
    ITEM_OVERHEAD_BYTES + item.word.len() as u64 + item.meaning.len() as u64 + item.id.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::batch::BatchWriter;
    use crate::storage::MemoryStorage;
    use crate::traits::ManualClock;
    use crate::types::{ReviewAction, ReviewRecord};
    use chrono::DateTime;
    use tempfile::TempDir;

    fn recovery_over(
        dir: &TempDir,
        storage: Arc<MemoryStorage>,
        now_ms: i64,
    ) -> Recovery {
        Recovery::new(
            storage as Arc<dyn Storage>,
            Arc::new(ManualClock::at(now_ms)) as Arc<dyn Clock>,
            dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn test_no_files_is_noop() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let report = recovery_over(&dir, storage, 0).run().await.unwrap();
        assert_eq!(report, RecoveryReport::default());
    }

    #[tokio::test]
    async fn test_snapshot_applied_and_deleted() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::at(0));

        // Produce a real snapshot through a failed flush.
        let writer = Arc::new(BatchWriter::new(
            storage.clone() as Arc<dyn Storage>,
            clock.clone() as Arc<dyn Clock>,
            BatchConfig {
                flush_interval_ms: 60_000,
                size_threshold: 100,
                data_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
        ));
        storage.set_fail_writes(true);
        let at = DateTime::from_timestamp_millis(1_000).unwrap();
        for i in 1..=3 {
            let id = format!("{:06}", i);
            let item = Item::new(&id, "w", "m", 1, at);
            let record = ReviewRecord::new(&id, 500, at, ReviewAction::SwipeNext, None);
            writer.enqueue(item, record).await.unwrap();
        }
        assert!(writer.flush().await.is_err());

        // Restart: storage is healthy again, recovery replays the snapshot.
        storage.set_fail_writes(false);
        let report = recovery_over(&dir, storage.clone(), 2_000).run().await.unwrap();

        assert_eq!(report.updates_applied, 3);
        assert_eq!(report.records_applied, 3);
        assert_eq!(storage.item_count().await, 3);
        assert_eq!(storage.record_count().await, 3);
        assert!(!dir.path().join(PENDING_SNAPSHOT_FILE).exists());
        // The crash log survives recovery.
        assert!(dir.path().join(BACKUP_LOG_FILE).exists());
        assert_eq!(report.backup_lines_scanned, 3);
        assert_eq!(report.backup_records_matched, 3);
    }

    #[tokio::test]
    async fn test_backup_scan_skips_bad_lines_and_unknown_items() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let at = DateTime::from_timestamp_millis(0).unwrap();
        storage
            .put_item(&Item::new("000001", "w", "m", 1, at))
            .await
            .unwrap();

        let log = concat!(
            "{\"itemId\":\"000001\",\"record\":{\"reviewTime\":1,\"dwellTime\":500,\"action\":\"SWIPE_NEXT\",\"sessionId\":null},\"timestamp\":1}\n",
            "not json at all\n",
            "{\"itemId\":\"000099\",\"record\":{\"reviewTime\":2,\"dwellTime\":600,\"action\":\"SHOW_MEANING\",\"sessionId\":null},\"timestamp\":2}\n",
        );
        std::fs::write(dir.path().join(BACKUP_LOG_FILE), log).unwrap();

        let report = recovery_over(&dir, storage, 10).run().await.unwrap();
        assert_eq!(report.backup_lines_scanned, 3);
        assert_eq!(report.backup_records_matched, 1);
        assert_eq!(report.parse_errors, 1);
    }

    #[tokio::test]
    async fn test_validation_counts() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        let due = DateTime::from_timestamp_millis(1_000).unwrap();
        let later = DateTime::from_timestamp_millis(90_000).unwrap();
        storage.put_item(&Item::new("000001", "w", "m", 1, due)).await.unwrap();
        storage.put_item(&Item::new("000002", "w", "m", 1, later)).await.unwrap();

        let report = recovery_over(&dir, storage, 5_000).run().await.unwrap();
        assert_eq!(report.total_items, 2);
        assert_eq!(report.due_items, 1);
        assert!(report.due_items <= report.total_items);
        assert!(report.memory_usage_estimate > 0);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_logged_not_fatal() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::new());
        std::fs::write(dir.path().join(PENDING_SNAPSHOT_FILE), "{broken").unwrap();

        let report = recovery_over(&dir, storage, 0).run().await.unwrap();
        assert_eq!(report.parse_errors, 1);
        assert_eq!(report.updates_applied, 0);
    }
}
