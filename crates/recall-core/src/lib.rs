//! recall-core - Adaptive review-scheduling core for the recall memory trainer.
//!
//! Given a library of study items, the core decides which item to show next
//! and when each item becomes due again, based on the learner's gestures and
//! dwell times. It combines the review-strength formulas, a recommendation
//! queue with due-time promotion, a gesture classifier, a session state
//! machine, and a write-behind batch pipeline with crash recovery.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use recall_core::{
//!     BatchWriter, CoreConfig, ItemStore, SessionManager, SqliteStorage, SystemClock,
//! };
//!
//! let config = CoreConfig::from_env();
//! let clock = Arc::new(SystemClock);
//! let storage = Arc::new(SqliteStorage::new("recall.db")?);
//! let store = Arc::new(ItemStore::new(storage.clone(), config.cache.clone()));
//! store.load_from_storage().await?;
//!
//! let batch = Arc::new(BatchWriter::new(storage, clock.clone(), config.batch.clone()));
//! let (session, rx) = SessionManager::new(config, clock, store, batch).await?;
//! session.spawn_pump(rx);
//!
//! session.start_session().await?;
//! let item = session.start_current_study().await?;
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod gesture;
pub mod queue;
pub mod review;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod store;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use batch::{BatchWriter, PendingSnapshot, Recovery, RecoveryReport};
pub use config::{
    BatchConfig, CacheConfig, CoreConfig, GestureConfig, ReviewParams, SchedulerConfig,
};
pub use error::{RecallError, RecallResult};
pub use events::{EventBus, EventSubscriber, SessionResult, StudyEvent};
pub use gesture::{GestureClassifier, TouchEvent};
pub use queue::RecommendationQueue;
pub use review::{Anomaly, ReviewCalculator, StrengthModel};
pub use scheduler::{DueScheduler, SchedulerMessage, SchedulerMessageReceiver};
pub use session::{SessionManager, SessionStatus};
pub use storage::{MemoryStorage, SqliteStorage};
pub use store::ItemStore;
pub use traits::{Clock, ManualClock, Storage, SystemClock};
pub use types::{IdCounter, Item, ItemId, ReviewAction, ReviewRecord};
