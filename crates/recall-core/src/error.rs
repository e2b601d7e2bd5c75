//! Error types for recall-core operations.
//!
//! Storage failures are split into transient errors (swallowed into the
//! pending snapshot and retried on a later flush) and fatal errors (surfaced
//! to the caller, ending the session).

use thiserror::Error;

/// Result type alias for recall-core operations.
pub type RecallResult<T> = Result<T, RecallError>;

/// Main error type for all recall-core operations.
#[derive(Error, Debug)]
pub enum RecallError {
    /// No session is active; the operation requires one.
    #[error("no active session")]
    NoActiveSession,

    /// A session is already active; end it before starting another.
    #[error("a session is already active")]
    SessionAlreadyActive,

    /// The recommendation queue has no current item.
    #[error("no current item in the queue")]
    NoCurrentItem,

    /// The item id counter is exhausted or the generated id collided.
    #[error("duplicate or exhausted item id: {id}")]
    DuplicateItemId { id: String },

    /// A review-interval computation produced a non-finite value.
    #[error("invalid interval: {detail}")]
    InvalidInterval { detail: String },

    /// Retryable storage failure; the pending buffer is kept for a later flush.
    #[error("transient storage error: {message}")]
    StorageTransient { message: String },

    /// Unrecoverable storage failure; surfaced and ends the session.
    #[error("fatal storage error: {message}")]
    StorageFatal { message: String },

    /// A line or document could not be parsed during recovery.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RecallError {
    /// Create a transient storage error.
    pub fn storage_transient(message: impl Into<String>) -> Self {
        Self::StorageTransient {
            message: message.into(),
        }
    }

    /// Create a fatal storage error.
    pub fn storage_fatal(message: impl Into<String>) -> Self {
        Self::StorageFatal {
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create an invalid-interval error.
    pub fn invalid_interval(detail: impl Into<String>) -> Self {
        Self::InvalidInterval {
            detail: detail.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error is retryable via the pending-snapshot path.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StorageTransient { .. } | Self::Io(_) | Self::Database(_)
        )
    }
}
