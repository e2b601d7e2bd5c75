//! Configuration for the review-scheduling core.
//!
//! All tunables are fixed at startup. Defaults match the values the session,
//! queue, scheduler, and batch writer are calibrated for; overriding them is
//! supported through the `with_*` setters and `RECALL_*` environment
//! variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Item and history cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity of the hot-item LRU (default: 1000).
    pub hot_capacity: usize,
    /// Capacity of the per-item history LRU (default: 500).
    pub history_capacity: usize,
    /// Maximum review records retained per item (default: 200).
    pub history_max_per_item: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 1000,
            history_capacity: 500,
            history_max_per_item: 200,
        }
    }
}

/// Parameters of the review-strength formulas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewParams {
    /// Base interval in milliseconds (default: 10 s).
    pub base_interval_ms: i64,
    /// Floor for any computed interval in milliseconds (default: 5 s).
    pub min_interval_ms: i64,
    /// Dwell below this is an accidental operation (default: 200 ms).
    pub accidental_threshold_ms: i64,
    /// Records averaged for the dwell factor (default: 3).
    pub recent_dwell_window: usize,
    /// Records inspected for anomaly detection (default: 5).
    pub anomaly_window: usize,
}

impl Default for ReviewParams {
    fn default() -> Self {
        Self {
            base_interval_ms: 10_000,
            min_interval_ms: 5_000,
            accidental_threshold_ms: 200,
            recent_dwell_window: 3,
            anomaly_window: 5,
        }
    }
}

/// Gesture classification thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GestureConfig {
    /// Maximum tap-to-tap separation for a double tap (default: 300 ms).
    pub double_tap_ms: i64,
    /// Minimum press duration for a long press (default: 500 ms).
    pub long_press_ms: i64,
    /// Minimum dominant-axis travel for a fling (default: 100 px).
    pub fling_distance_px: f64,
    /// Minimum dominant-axis velocity for a fling (default: 50 px/s).
    pub fling_velocity_px_s: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            double_tap_ms: 300,
            long_press_ms: 500,
            fling_distance_px: 100.0,
            fling_velocity_px_s: 50.0,
        }
    }
}

/// Due-time scheduler intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Recurring review-check interval (default: 60 s).
    pub review_check_interval_ms: i64,
    /// Re-check interval after returning from background (default: 30 s).
    pub background_check_interval_ms: i64,
    /// Timers may fire up to this much late (default: 250 ms).
    pub drift_tolerance_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            review_check_interval_ms: 60_000,
            background_check_interval_ms: 30_000,
            drift_tolerance_ms: 250,
        }
    }
}

/// Batch writer thresholds and file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush when this much time has passed since the last flush (default: 5 s).
    pub flush_interval_ms: i64,
    /// Flush when this many pending item updates accumulate (default: 10).
    pub size_threshold: usize,
    /// Recurring auto-flush interval (default: 30 s).
    pub auto_flush_interval_ms: i64,
    /// Bounded timeout for each storage call during flush (default: 3 s).
    pub storage_timeout_ms: u64,
    /// Directory holding the crash log and pending snapshot.
    pub data_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 5_000,
            size_threshold: 10,
            auto_flush_interval_ms: 30_000,
            storage_timeout_ms: 3_000,
            data_dir: PathBuf::from("."),
        }
    }
}

/// Top-level configuration for the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub cache: CacheConfig,
    pub review: ReviewParams,
    pub gesture: GestureConfig,
    pub scheduler: SchedulerConfig,
    pub batch: BatchConfig,
}

impl CoreConfig {
    /// Set the data directory for the batch writer's files.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.batch.data_dir = dir.into();
        self
    }

    /// Set the hot-item cache capacity.
    pub fn with_hot_capacity(mut self, capacity: usize) -> Self {
        self.cache.hot_capacity = capacity.max(1);
        self
    }

    /// Set the accidental-operation threshold.
    pub fn with_accidental_threshold_ms(mut self, threshold: i64) -> Self {
        self.review.accidental_threshold_ms = threshold;
        self
    }

    /// Set the batch flush interval.
    pub fn with_flush_interval_ms(mut self, interval: i64) -> Self {
        self.batch.flush_interval_ms = interval.max(1);
        self
    }

    /// Set the batch size threshold.
    pub fn with_size_threshold(mut self, threshold: usize) -> Self {
        self.batch.size_threshold = threshold.max(1);
        self
    }

    /// Set the recurring review-check interval.
    pub fn with_review_check_interval_ms(mut self, interval: i64) -> Self {
        self.scheduler.review_check_interval_ms = interval.max(1);
        self
    }

    /// Create config from environment variables.
    ///
    /// Reads:
    /// - `RECALL_DATA_DIR`
    /// - `RECALL_HOT_CACHE_CAPACITY`
    /// - `RECALL_HISTORY_CACHE_CAPACITY`
    /// - `RECALL_ACCIDENTAL_THRESHOLD_MS`
    /// - `RECALL_FLUSH_INTERVAL_MS`
    /// - `RECALL_BATCH_SIZE_THRESHOLD`
    /// - `RECALL_AUTO_FLUSH_INTERVAL_MS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("RECALL_DATA_DIR") {
            config.batch.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse("RECALL_HOT_CACHE_CAPACITY") {
            config.cache.hot_capacity = v;
        }
        if let Some(v) = env_parse("RECALL_HISTORY_CACHE_CAPACITY") {
            config.cache.history_capacity = v;
        }
        if let Some(v) = env_parse("RECALL_ACCIDENTAL_THRESHOLD_MS") {
            config.review.accidental_threshold_ms = v;
        }
        if let Some(v) = env_parse("RECALL_FLUSH_INTERVAL_MS") {
            config.batch.flush_interval_ms = v;
        }
        if let Some(v) = env_parse("RECALL_BATCH_SIZE_THRESHOLD") {
            config.batch.size_threshold = v;
        }
        if let Some(v) = env_parse("RECALL_AUTO_FLUSH_INTERVAL_MS") {
            config.batch.auto_flush_interval_ms = v;
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
