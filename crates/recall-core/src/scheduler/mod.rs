//! Due-time scheduler.
//!
//! Per-item one-shot timers promote items back into the recommendation
//! queue at their due instant, and a single idle-wait timer wakes an empty
//! session when the next item comes due. The scheduler owns only item ids
//! and an outbox channel; it never mutates core state. The session drains
//! the outbox serially and re-verifies due-ness on delivery, which also
//! absorbs the permitted timer drift (up to 250 ms late).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RecallError, RecallResult};
use crate::types::ItemId;

/// Messages the scheduler posts to the session's serial queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerMessage {
    /// An item's due timer fired; the session decides whether to promote it.
    Promote(ItemId),
    /// The idle-wait or periodic check fired; rebuild the queue.
    RefreshQueue,
}

/// Channel for receiving scheduler messages.
pub type SchedulerMessageReceiver = mpsc::Receiver<SchedulerMessage>;

/// Scheduler for per-item due timers and the idle-wait timer.
pub struct DueScheduler {
    scheduler: JobScheduler,
    /// Item id -> pending one-shot job (at most one per id).
    job_map: Arc<RwLock<HashMap<ItemId, Uuid>>>,
    /// The single idle-wait slot, replaced on any trigger.
    idle_job: Arc<RwLock<Option<Uuid>>>,
    /// The recurring review-check job, if installed.
    periodic_job: RwLock<Option<Uuid>>,
    outbox: mpsc::Sender<SchedulerMessage>,
    running: RwLock<bool>,
}

impl DueScheduler {
    /// Create a new scheduler.
    ///
    /// Returns the scheduler and the receiver for its messages.
    pub async fn new() -> RecallResult<(Self, SchedulerMessageReceiver)> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| RecallError::internal(format!("failed to create scheduler: {}", e)))?;

        let (tx, rx) = mpsc::channel(256);

        Ok((
            Self {
                scheduler,
                job_map: Arc::new(RwLock::new(HashMap::new())),
                idle_job: Arc::new(RwLock::new(None)),
                periodic_job: RwLock::new(None),
                outbox: tx,
                running: RwLock::new(false),
            },
            rx,
        ))
    }

    /// Start the scheduler.
    pub async fn start(&self) -> RecallResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            self.scheduler
                .start()
                .await
                .map_err(|e| RecallError::internal(format!("failed to start scheduler: {}", e)))?;
            *running = true;
        }
        Ok(())
    }

    /// Stop the scheduler and its jobs.
    pub async fn shutdown(&mut self) -> RecallResult<()> {
        let mut running = self.running.write().await;
        if *running {
            self.scheduler.shutdown().await.map_err(|e| {
                RecallError::internal(format!("failed to shutdown scheduler: {}", e))
            })?;
            *running = false;
        }
        Ok(())
    }

    /// Whether the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Register a one-shot due timer for an item.
    ///
    /// Replaces any pending timer for the same id. An already-due instant
    /// posts `Promote` immediately instead of scheduling.
    pub async fn register_item(
        &self,
        id: &str,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RecallResult<()> {
        self.cancel_item(id).await?;

        if due_at <= now {
            let _ = self.outbox.send(SchedulerMessage::Promote(id.to_string())).await;
            return Ok(());
        }

        let duration = (due_at - now)
            .to_std()
            .map_err(|e| RecallError::internal(format!("invalid timer duration: {}", e)))?;

        let sender = self.outbox.clone();
        let map = self.job_map.clone();
        let item_id = id.to_string();
        let job = Job::new_one_shot_async(duration, move |uuid, _lock| {
            let sender = sender.clone();
            let map = map.clone();
            let item_id = item_id.clone();
            Box::pin(async move {
                // Drop the bookkeeping entry unless a newer timer replaced it.
                let mut jobs = map.write().await;
                if jobs.get(&item_id) == Some(&uuid) {
                    jobs.remove(&item_id);
                }
                drop(jobs);
                let _ = sender.send(SchedulerMessage::Promote(item_id)).await;
            })
        })
        .map_err(|e| RecallError::internal(format!("failed to create item timer: {}", e)))?;

        let job_id = job.guid();
        self.scheduler
            .add(job)
            .await
            .map_err(|e| RecallError::internal(format!("failed to add item timer: {}", e)))?;

        self.job_map.write().await.insert(id.to_string(), job_id);
        debug!(item_id = %id, due_at = %due_at, "registered due timer");
        Ok(())
    }

    /// Cancel the pending timer for an item, if any.
    pub async fn cancel_item(&self, id: &str) -> RecallResult<()> {
        let removed = self.job_map.write().await.remove(id);
        if let Some(job_id) = removed {
            self.scheduler
                .remove(&job_id)
                .await
                .map_err(|e| RecallError::internal(format!("failed to remove timer: {}", e)))?;
        }
        Ok(())
    }

    /// Arm the idle-wait timer for the next due instant.
    ///
    /// A single slot: any prior idle-wait is replaced. Fires `RefreshQueue`.
    pub async fn schedule_idle_wait(
        &self,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RecallResult<()> {
        if let Some(job_id) = self.idle_job.write().await.take() {
            if let Err(e) = self.scheduler.remove(&job_id).await {
                warn!("failed to replace idle-wait timer: {}", e);
            }
        }

        if at <= now {
            let _ = self.outbox.send(SchedulerMessage::RefreshQueue).await;
            return Ok(());
        }

        let duration = (at - now)
            .to_std()
            .map_err(|e| RecallError::internal(format!("invalid idle-wait duration: {}", e)))?;

        let sender = self.outbox.clone();
        let slot = self.idle_job.clone();
        let job = Job::new_one_shot_async(duration, move |uuid, _lock| {
            let sender = sender.clone();
            let slot = slot.clone();
            Box::pin(async move {
                let mut current = slot.write().await;
                if *current == Some(uuid) {
                    *current = None;
                }
                drop(current);
                let _ = sender.send(SchedulerMessage::RefreshQueue).await;
            })
        })
        .map_err(|e| RecallError::internal(format!("failed to create idle-wait: {}", e)))?;

        let job_id = job.guid();
        self.scheduler
            .add(job)
            .await
            .map_err(|e| RecallError::internal(format!("failed to add idle-wait: {}", e)))?;

        *self.idle_job.write().await = Some(job_id);
        debug!(at = %at, "armed idle-wait timer");
        Ok(())
    }

    /// Install the recurring review-check job (replaces any existing one).
    pub async fn start_periodic_check(&self, interval: Duration) -> RecallResult<()> {
        if let Some(job_id) = self.periodic_job.write().await.take() {
            let _ = self.scheduler.remove(&job_id).await;
        }

        let sender = self.outbox.clone();
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let sender = sender.clone();
            Box::pin(async move {
                let _ = sender.send(SchedulerMessage::RefreshQueue).await;
            })
        })
        .map_err(|e| RecallError::internal(format!("failed to create periodic check: {}", e)))?;

        let job_id = job.guid();
        self.scheduler
            .add(job)
            .await
            .map_err(|e| RecallError::internal(format!("failed to add periodic check: {}", e)))?;

        *self.periodic_job.write().await = Some(job_id);
        Ok(())
    }

    /// Cancel every per-item timer and the idle-wait. The periodic check
    /// survives until shutdown so a later session keeps its re-checks.
    pub async fn cancel_all(&self) -> RecallResult<()> {
        let ids: Vec<ItemId> = self.job_map.read().await.keys().cloned().collect();
        for id in ids {
            self.cancel_item(&id).await?;
        }
        if let Some(job_id) = self.idle_job.write().await.take() {
            let _ = self.scheduler.remove(&job_id).await;
        }
        Ok(())
    }

    /// Number of pending per-item timers.
    pub async fn job_count(&self) -> usize {
        self.job_map.read().await.len()
    }

    /// Whether the idle-wait slot is armed.
    pub async fn idle_wait_armed(&self) -> bool {
        self.idle_job.read().await.is_some()
    }
}
