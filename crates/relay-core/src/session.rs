//! Session identity and worker lifecycle states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logical conversation, bound to at most one live worker at a time.
///
/// Created on the first request for a new id; the identity is immutable.
/// Destroyed by explicit removal or idle eviction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Stable session identifier.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time a request was dispatched for this session.
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    /// Create a session record stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// Lifecycle state of a session worker.
///
/// `Broken` and `Stopped` are absorbing: once entered, the worker is done
/// and a later request for the same session gets a brand-new worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Establishing the connection; not yet published.
    Starting,
    /// Idle, waiting on the inbound queue.
    Ready,
    /// Serving one request.
    Busy,
    /// Connection-level fault; evicted from the registry.
    Broken,
    /// Shut down deliberately; drains no further input.
    Stopped,
}

impl WorkerState {
    /// Whether no further transitions can leave this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Broken | Self::Stopped)
    }

    /// Whether the state machine permits moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        match self {
            Self::Starting => matches!(next, Self::Ready | Self::Broken),
            Self::Ready => matches!(next, Self::Busy | Self::Stopped),
            Self::Busy => matches!(next, Self::Ready | Self::Broken | Self::Stopped),
            Self::Broken | Self::Stopped => false,
        }
    }
}
