//! Error taxonomy for the bridge.
//!
//! Only [`RelayError::Connection`] is fatal to a session worker: the owned
//! connection is unusable and the worker must be evicted. Every other kind
//! is scoped to one request. Timeout escalation (a worker that does not
//! acknowledge cancellation) is decided at the worker, not here.

use thiserror::Error;

use crate::events::RelayEvent;

/// Errors produced by the bridge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The owned connection is unusable; the worker must be evicted.
    #[error("agent connection failed: {0}")]
    Connection(String),

    /// A failure scoped to one request; the worker returns to ready.
    #[error("request failed: {0}")]
    Request(String),

    /// No progress from the agent within the configured window.
    #[error("no progress from agent within {timeout_ms} ms")]
    Timeout {
        /// The elapsed window in milliseconds.
        timeout_ms: u64,
    },

    /// A raw message could not be decoded; logged and skipped, never
    /// failing the request.
    #[error("malformed agent message: {0}")]
    Serialization(String),

    /// The session's spend budget is exhausted.
    #[error("session budget exceeded: {0}")]
    BudgetExceeded(String),
}

impl RelayError {
    /// Whether this error leaves the connection unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether the session remains usable after this error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// The user-visible outward event for this error.
    #[must_use]
    pub fn to_event(&self) -> RelayEvent {
        RelayEvent::Error {
            message: self.to_string(),
            recoverable: self.is_recoverable(),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
