//! Session manager.
//!
//! The state machine tying the queue, calculator, store, scheduler, and
//! batch writer together: `Idle -> Active <-> Paused -> Ended`. The session
//! is the single logical owner of all core mutations; the scheduler only
//! posts messages, which [`SessionManager::spawn_pump`] delivers serially.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::batch::BatchWriter;
use crate::error::{RecallError, RecallResult};
use crate::events::{EventBus, EventSubscriber, SessionResult, StudyEvent};
use crate::queue::RecommendationQueue;
use crate::review::ReviewCalculator;
use crate::scheduler::{DueScheduler, SchedulerMessage, SchedulerMessageReceiver};
use crate::store::ItemStore;
use crate::traits::Clock;
use crate::types::{Item, ItemId, ReviewAction, ReviewRecord};

/// Coarse session status for callers that only need the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Active,
    Paused,
    Ended,
}

struct ActiveSession {
    session_id: String,
    start_time: DateTime<Utc>,
    queue: RecommendationQueue,
    studied: HashSet<ItemId>,
    total_actions: u64,
    /// Set while an item is being studied; dwell is measured from here.
    study_start: Option<DateTime<Utc>>,
}

impl ActiveSession {
    fn result(&self, end_time: DateTime<Utc>) -> SessionResult {
        SessionResult {
            session_id: self.session_id.clone(),
            start_time: self.start_time,
            end_time,
            items_studied: self.studied.len(),
            total_actions: self.total_actions,
        }
    }
}

enum SessionState {
    Idle,
    Active(ActiveSession),
    Paused(ActiveSession),
    Ended,
}

impl SessionState {
    fn active_mut(&mut self) -> RecallResult<&mut ActiveSession> {
        match self {
            SessionState::Active(session) => Ok(session),
            _ => Err(RecallError::NoActiveSession),
        }
    }

    fn status(&self) -> SessionStatus {
        match self {
            SessionState::Idle => SessionStatus::Idle,
            SessionState::Active(_) => SessionStatus::Active,
            SessionState::Paused(_) => SessionStatus::Paused,
            SessionState::Ended => SessionStatus::Ended,
        }
    }
}

/// Orchestrates one study session at a time.
pub struct SessionManager {
    config: CoreConfig,
    clock: Arc<dyn Clock>,
    store: Arc<ItemStore>,
    calculator: ReviewCalculator,
    batch: Arc<BatchWriter>,
    scheduler: DueScheduler,
    bus: EventBus,
    state: Mutex<SessionState>,
    auto_flush: JoinHandle<()>,
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.auto_flush.abort();
    }
}

impl SessionManager {
    /// Create a session manager and start its scheduler.
    ///
    /// Returns the manager and the scheduler's message receiver; pass the
    /// receiver to [`SessionManager::spawn_pump`] (or drain it manually in
    /// tests).
    pub async fn new(
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        store: Arc<ItemStore>,
        batch: Arc<BatchWriter>,
    ) -> RecallResult<(Arc<Self>, SchedulerMessageReceiver)> {
        let (scheduler, rx) = DueScheduler::new().await?;
        scheduler.start().await?;
        scheduler
            .start_periodic_check(Duration::from_millis(
                config.scheduler.review_check_interval_ms.max(1) as u64,
            ))
            .await?;

        let calculator = ReviewCalculator::new(config.review.clone());
        let auto_flush = batch.spawn_auto_flush();
        let manager = Arc::new(Self {
            config,
            clock,
            store,
            calculator,
            batch,
            scheduler,
            bus: EventBus::new(),
            state: Mutex::new(SessionState::Idle),
            auto_flush,
        });
        Ok((manager, rx))
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    /// Spawn the serial pump delivering scheduler messages to this session.
    pub fn spawn_pump(self: &Arc<Self>, mut rx: SchedulerMessageReceiver) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = session.handle_scheduler_message(msg).await {
                    warn!("scheduler message handling failed: {}", e);
                }
            }
        })
    }

    /// Current phase of the session lifecycle.
    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status()
    }

    /// Ids currently queued, head first.
    pub async fn queue_ids(&self) -> Vec<ItemId> {
        match &*self.state.lock().await {
            SessionState::Active(s) | SessionState::Paused(s) => s.queue.ids().to_vec(),
            _ => Vec::new(),
        }
    }

    /// The item under the queue cursor, if any.
    pub async fn current_item(&self) -> Option<Item> {
        let id = match &*self.state.lock().await {
            SessionState::Active(s) => s.queue.current().cloned(),
            _ => None,
        }?;
        self.store.get_item(&id).await
    }

    /// Start a new session: build the initial queue from every due item and
    /// become active.
    pub async fn start_session(&self) -> RecallResult<String> {
        let mut state = self.state.lock().await;
        if matches!(*state, SessionState::Active(_) | SessionState::Paused(_)) {
            return Err(RecallError::SessionAlreadyActive);
        }

        let now = self.clock.now();
        let items = self.store.all_items().await;
        let queue = RecommendationQueue::build_initial(&items, now);
        let session_id = Uuid::new_v4().to_string();
        let queue_empty = queue.is_empty();

        info!(session_id = %session_id, due = queue.len(), "session started");
        *state = SessionState::Active(ActiveSession {
            session_id: session_id.clone(),
            start_time: now,
            queue,
            studied: HashSet::new(),
            total_actions: 0,
            study_start: None,
        });
        self.bus.emit(StudyEvent::SessionStarted {
            session_id: session_id.clone(),
        });

        if queue_empty {
            self.arm_idle_wait(now).await?;
            self.bus.emit(StudyEvent::QueueEmpty);
        }
        Ok(session_id)
    }

    /// Begin studying the current item; dwell timing starts now.
    pub async fn start_current_study(&self) -> RecallResult<Item> {
        let mut state = self.state.lock().await;
        let session = state.active_mut()?;

        let id = session
            .queue
            .current()
            .ok_or(RecallError::NoCurrentItem)?
            .clone();
        let item = self
            .store
            .get_item(&id)
            .await
            .ok_or(RecallError::NoCurrentItem)?;

        session.study_start = Some(self.clock.now());
        self.bus.emit(StudyEvent::StudyStarted(item.clone()));
        Ok(item)
    }

    /// Apply a classified gesture to the current study.
    ///
    /// Gestures under the accidental threshold emit `AccidentalOperation`
    /// and change nothing; gestures on a paused session are discarded.
    pub async fn on_gesture(&self, action: ReviewAction) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        let session = match &mut *state {
            SessionState::Paused(_) => return Ok(()),
            other => other.active_mut()?,
        };

        // A completed study cannot be scored twice.
        let study_start = session.study_start.ok_or(RecallError::NoCurrentItem)?;
        let now = self.clock.now();
        let dwell = (now - study_start).num_milliseconds();
        if dwell < self.config.review.accidental_threshold_ms {
            debug!(dwell, action = action.label(), "accidental operation rejected");
            self.bus.emit(StudyEvent::AccidentalOperation {
                dwell_millis: dwell,
                description: action.label().to_string(),
            });
            return Ok(());
        }

        let id = session
            .queue
            .current()
            .ok_or(RecallError::NoCurrentItem)?
            .clone();
        let item = self
            .store
            .get_item(&id)
            .await
            .ok_or(RecallError::NoCurrentItem)?;
        let history = self.store.get_history(&id).await?;

        let record = ReviewRecord::new(
            &id,
            dwell,
            now,
            action,
            Some(session.session_id.clone()),
        );
        let updated = self.calculator.compute_update(&item, &record, &history);

        self.store.update_item(updated.clone()).await;
        self.store.add_record(&id, record.clone()).await?;

        let mut recent = history;
        recent.push(record.clone());
        match self.calculator.model().detect_anomaly(&recent) {
            crate::review::Anomaly::None => {}
            anomaly => warn!(item_id = %id, ?anomaly, "suspicious input pattern"),
        }

        if updated.next_review_time > now {
            session.queue.remove_item(&id);
            self.scheduler
                .register_item(&id, updated.next_review_time, now)
                .await?;
        }

        session.study_start = None;
        session.studied.insert(id);
        session.total_actions += 1;

        if let Err(e) = self.batch.enqueue(updated.clone(), record.clone()).await {
            if e.is_transient() {
                warn!("write-behind flush deferred: {}", e);
            } else {
                return Err(e);
            }
        }

        self.bus.emit(StudyEvent::StudyCompleted {
            item,
            record,
            updated,
        });

        if session.queue.is_empty() {
            self.arm_idle_wait(now).await?;
            self.bus.emit(StudyEvent::QueueEmpty);
        }
        Ok(())
    }

    /// Move the cursor to the next item to study.
    ///
    /// A due item at the queue head preempts the cursor position (promoted
    /// and imported items are inserted there). Falling off the end of a
    /// non-empty queue wraps to the head; an empty queue arms the idle-wait
    /// timer. Any in-flight study timing is discarded.
    pub async fn move_to_next(&self) -> RecallResult<Option<Item>> {
        let mut state = self.state.lock().await;
        let session = state.active_mut()?;
        let now = self.clock.now();
        session.study_start = None;

        if session.queue.current_index() != 0 {
            if let Some(head) = session.queue.head().cloned() {
                if let Some(item) = self.store.get_item(&head).await {
                    if item.is_due(now) {
                        session.queue.wrap_to_start();
                        return Ok(Some(item));
                    }
                }
            }
        }

        if !session.queue.advance() {
            if session.queue.is_empty() {
                self.arm_idle_wait(now).await?;
                self.bus.emit(StudyEvent::QueueEmpty);
                return Ok(None);
            }
            session.queue.wrap_to_start();
        }

        let id = session
            .queue
            .current()
            .ok_or(RecallError::NoCurrentItem)?
            .clone();
        Ok(self.store.get_item(&id).await)
    }

    /// Pause the session; gestures and scheduler effects are discarded
    /// until resume. Timers keep running.
    pub async fn pause_session(&self) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SessionState::Ended) {
            SessionState::Active(mut session) => {
                session.queue.pause();
                session.study_start = None;
                *state = SessionState::Paused(session);
                self.bus.emit(StudyEvent::SessionPaused);
                Ok(())
            }
            other => {
                *state = other;
                Err(RecallError::NoActiveSession)
            }
        }
    }

    /// Resume a paused session and re-check due items (promotions that
    /// fired while paused were discarded).
    pub async fn resume_session(&self) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SessionState::Ended) {
            SessionState::Paused(mut session) => {
                session.queue.resume();
                *state = SessionState::Active(session);
                self.bus.emit(StudyEvent::SessionResumed);
                let now = self.clock.now();
                self.refresh_queue(state.active_mut()?, now).await
            }
            other => {
                *state = other;
                Err(RecallError::NoActiveSession)
            }
        }
    }

    /// End the session: cancel all timers, force-flush the batch writer,
    /// and emit the result. Later operations fail with `NoActiveSession`.
    pub async fn end_session(&self) -> RecallResult<SessionResult> {
        let mut state = self.state.lock().await;
        let session = match std::mem::replace(&mut *state, SessionState::Ended) {
            SessionState::Active(session) | SessionState::Paused(session) => session,
            other => {
                *state = other;
                return Err(RecallError::NoActiveSession);
            }
        };

        self.scheduler.cancel_all().await?;

        if let Err(e) = self.batch.flush().await {
            if e.is_transient() {
                warn!("end-session flush deferred to pending snapshot: {}", e);
            } else {
                return Err(e);
            }
        }

        let result = session.result(self.clock.now());
        info!(
            session_id = %result.session_id,
            items = result.items_studied,
            actions = result.total_actions,
            "session ended"
        );
        self.bus.emit(StudyEvent::SessionEnded(result.clone()));
        Ok(result)
    }

    /// Import a new item. During an active session it is placed at the
    /// queue head so the next advance switches to it.
    pub async fn add_item(
        &self,
        word: impl Into<String>,
        meaning: impl Into<String>,
        level: i32,
    ) -> RecallResult<Item> {
        let now = self.clock.now();
        let id = self.store.next_id()?;
        let item = Item::new(id, word, meaning, level, now);
        self.store.add_item(item.clone()).await;

        if let Err(e) = self.batch.enqueue_update(item.clone()).await {
            if e.is_transient() {
                warn!("import write deferred: {}", e);
            } else {
                return Err(e);
            }
        }

        let mut state = self.state.lock().await;
        if let SessionState::Active(session) = &mut *state {
            session.queue.add_item(&item.id);
            self.bus.emit(StudyEvent::ItemAddedToQueue(item.clone()));
        }
        Ok(item)
    }

    /// Deliver one scheduler message. Promotions are re-verified against
    /// the item's current due time; paused or inactive sessions discard
    /// everything.
    pub async fn handle_scheduler_message(&self, msg: SchedulerMessage) -> RecallResult<()> {
        let mut state = self.state.lock().await;
        let session = match &mut *state {
            SessionState::Active(session) => session,
            _ => return Ok(()),
        };
        let now = self.clock.now();

        match msg {
            SchedulerMessage::Promote(id) => {
                let Some(item) = self.store.get_item(&id).await else {
                    return Ok(());
                };
                if !item.is_due(now) || session.queue.contains(&id) {
                    return Ok(());
                }
                let had_current = session.queue.current().is_some();
                session.queue.add_item(&id);
                debug!(item_id = %id, "item promoted to queue head");
                self.bus.emit(StudyEvent::ItemPromoted(item.clone()));
                if !had_current {
                    session.queue.wrap_to_start();
                    self.bus.emit(StudyEvent::QueueRefreshed(Some(item)));
                }
                Ok(())
            }
            SchedulerMessage::RefreshQueue => self.refresh_queue(session, now).await,
        }
    }

    /// Force-flush on entering the background.
    pub async fn on_background(&self) -> RecallResult<()> {
        if let Err(e) = self.batch.flush().await {
            if e.is_transient() {
                warn!("background flush deferred: {}", e);
                return Ok(());
            }
            return Err(e);
        }
        Ok(())
    }

    /// Re-check due items on returning to the foreground.
    pub async fn on_foreground(&self) -> RecallResult<()> {
        self.handle_scheduler_message(SchedulerMessage::RefreshQueue)
            .await
    }

    async fn refresh_queue(
        &self,
        session: &mut ActiveSession,
        now: DateTime<Utc>,
    ) -> RecallResult<()> {
        let items = self.store.all_items().await;
        session.queue = RecommendationQueue::build_initial(&items, now);
        if let Some(id) = session.queue.current().cloned() {
            let item = self.store.get_item(&id).await;
            debug!(due = session.queue.len(), "queue refreshed");
            self.bus.emit(StudyEvent::QueueRefreshed(item));
        } else {
            self.arm_idle_wait(now).await?;
        }
        Ok(())
    }

    async fn arm_idle_wait(&self, now: DateTime<Utc>) -> RecallResult<()> {
        if let Some(at) = self.store.next_due_after(now).await {
            self.scheduler.schedule_idle_wait(at, now).await?;
        }
        Ok(())
    }
}
