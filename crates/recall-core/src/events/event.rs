//! Study lifecycle events.
//!
//! Events are fire-and-forget: they may be delivered from the session task
//! or the scheduler task, and subscribers must not take locks shared with
//! the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Item, ReviewRecord};

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    /// Session identifier.
    pub session_id: String,
    /// When the session started.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// When the session ended.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    /// Distinct items studied.
    pub items_studied: usize,
    /// Accepted (non-accidental) gestures.
    pub total_actions: u64,
}

/// Events emitted over the course of a study session.
#[derive(Debug, Clone)]
pub enum StudyEvent {
    /// A session became active.
    SessionStarted { session_id: String },
    /// The session ended; no further operations are accepted.
    SessionEnded(SessionResult),
    /// The session was paused; gestures are discarded until resume.
    SessionPaused,
    /// The session resumed.
    SessionResumed,
    /// Study of the current item began; dwell timing starts here.
    StudyStarted(Item),
    /// A gesture was accepted and scored.
    StudyCompleted {
        item: Item,
        record: ReviewRecord,
        updated: Item,
    },
    /// The recommendation queue ran out of due items.
    QueueEmpty,
    /// The queue was rebuilt; the item, if any, is the new head.
    QueueRefreshed(Option<Item>),
    /// A scheduled item came due and was promoted to the queue head.
    ItemPromoted(Item),
    /// A newly imported item was placed at the queue head.
    ItemAddedToQueue(Item),
    /// A gesture arrived before the dwell threshold and was rejected.
    AccidentalOperation { dwell_millis: i64, description: String },
}

impl StudyEvent {
    /// Short tag for filtering and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session.started",
            Self::SessionEnded(_) => "session.ended",
            Self::SessionPaused => "session.paused",
            Self::SessionResumed => "session.resumed",
            Self::StudyStarted(_) => "study.started",
            Self::StudyCompleted { .. } => "study.completed",
            Self::QueueEmpty => "queue.empty",
            Self::QueueRefreshed(_) => "queue.refreshed",
            Self::ItemPromoted(_) => "queue.item_promoted",
            Self::ItemAddedToQueue(_) => "queue.item_added",
            Self::AccidentalOperation { .. } => "study.accidental",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kinds() {
        let event = StudyEvent::SessionStarted {
            session_id: "s1".to_string(),
        };
        assert_eq!(event.kind(), "session.started");
        assert_eq!(StudyEvent::QueueEmpty.kind(), "queue.empty");
    }

    #[test]
    fn test_session_result_serde() {
        let result = SessionResult {
            session_id: "s1".to_string(),
            start_time: DateTime::from_timestamp_millis(0).unwrap(),
            end_time: DateTime::from_timestamp_millis(60_000).unwrap(),
            items_studied: 3,
            total_actions: 7,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["endTime"], 60_000);
        assert_eq!(value["itemsStudied"], 3);
    }
}
