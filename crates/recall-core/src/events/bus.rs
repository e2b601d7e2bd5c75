//! Delivery of study events to listeners.
//!
//! Emission never waits on a listener. Events flow through a broadcast
//! channel sized for short bursts; a listener that falls behind loses the
//! oldest events instead of applying backpressure to the session or the
//! scheduler.

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::events::StudyEvent;

/// Events buffered per listener before the oldest are dropped.
const CHANNEL_DEPTH: usize = 256;

/// Fan-out sender for study events.
///
/// Cloning is cheap and every clone feeds the same listeners. Emitting
/// with nobody attached discards the event.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StudyEvent>,
}

impl EventBus {
    /// Create a bus with the default per-listener buffer.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_DEPTH);
        Self { tx }
    }

    /// Attach a listener; it sees only events emitted after this call.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
        }
    }

    /// Hand an event to every attached listener without blocking.
    pub fn emit(&self, event: StudyEvent) {
        // An Err here only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

/// One listener's receiving end of the bus.
pub struct EventSubscriber {
    rx: broadcast::Receiver<StudyEvent>,
}

impl EventSubscriber {
    /// Wait for the next event.
    ///
    /// A listener that lagged resumes at the oldest event still buffered,
    /// logging how many it missed. Yields `None` once every bus clone has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<StudyEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => break Some(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event listener fell behind");
                }
                Err(RecvError::Closed) => break None,
            }
        }
    }

    /// Take an already-buffered event, if one is waiting.
    pub fn try_recv(&mut self) -> Option<StudyEvent> {
        self.rx.try_recv().ok()
    }
}
