//! Error types for the sync engine.

use crate::family::ResourceFamily;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing the mirror.
///
/// None of these are fatal to a consumer: the event that produced them is
/// logged and dropped, and the next sync corrects any drift.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The orchestration platform could not be queried.
    #[error("platform error: {message}")]
    Platform {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The platform answered with something that is not a listing.
    #[error("unexpected platform response for {command}: {message}")]
    UnexpectedResponse {
        /// List command that was issued.
        command: String,
        /// What was wrong with the response.
        message: String,
    },

    /// The persistence layer failed.
    #[error("store error: {0}")]
    Store(String),

    /// A descriptor returned by the platform has no uuid.
    #[error("{family} descriptor without an id")]
    MissingUuid {
        /// Family being synchronized.
        family: ResourceFamily,
    },

    /// No synchronizer is registered for a family.
    #[error("no synchronizer registered for {0}")]
    UnregisteredFamily(ResourceFamily),

    /// The security context is not allowed to perform the call.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// An async platform job did not finish in time.
    #[error("job {target} timed out after {elapsed:?}")]
    Timeout {
        /// Resource the job was about.
        target: String,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// The message bus failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the subscription can be retried.
        retryable: bool,
    },

    /// A handler panicked while processing an event.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl SyncError {
    /// Creates a retryable platform error.
    pub fn platform_retryable(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable platform error.
    pub fn platform_fatal(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if this error is transient.
    ///
    /// Events are never redelivered on failure; this only informs the caller
    /// of a poll or a subscription whether trying again could help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Platform { retryable, .. } => *retryable,
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout { .. } => true,
            SyncError::Store(_) => true,
            _ => false,
        }
    }

    /// Returns true for poll timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::UnexpectedResponse {
            command: "json".into(),
            message: err.to_string(),
        }
    }
}
