//! The seam between the runtime and a concrete agent transport.
//!
//! A [`SessionWorker`](crate::worker::SessionWorker) owns exactly one
//! [`AgentConnection`] for its whole life, and every use of that connection
//! happens inside the worker's task. The connection therefore only needs to
//! be [`Send`] — it is moved into the task once and never shared.
//!
//! [`AgentConnector`] is the factory side: shared across workers, it opens a
//! fresh connection per session.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use relay_core::{AgentMessage, RelayError};
use relay_settings::RelaySettings;

/// Stream of raw messages produced by one in-flight request.
///
/// The stream owns its resources; dropping it abandons the request from the
/// reader's side (the agent is told separately via
/// [`AgentConnection::interrupt`]).
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<AgentMessage, RelayError>> + Send>>;

/// Parameters applied when opening a connection.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectOptions {
    /// Model identifier for the orchestrating agent.
    pub model: String,
    /// Maximum agent turns per request.
    pub max_turns: u32,
    /// Per-session spend budget in USD.
    pub max_budget_usd: f64,
    /// Strip nested-session markers from the spawned agent's environment so
    /// it does not detect itself as running inside another session.
    pub suppress_nested_session: bool,
}

impl ConnectOptions {
    /// Build connect options from loaded settings.
    #[must_use]
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            model: settings.agent.model.clone(),
            max_turns: settings.agent.max_turns,
            max_budget_usd: settings.agent.max_budget_usd,
            suppress_nested_session: settings.worker.suppress_nested_session,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::from_settings(&RelaySettings::default())
    }
}

/// Factory for agent connections, shared across all session workers.
#[async_trait]
pub trait AgentConnector: Send + Sync + 'static {
    /// Open a fresh connection for `session_id`.
    ///
    /// Returns [`RelayError::Connection`] when the transport cannot be
    /// established; the worker never becomes ready in that case.
    async fn connect(
        &self,
        session_id: &str,
        options: &ConnectOptions,
    ) -> Result<Box<dyn AgentConnection>, RelayError>;
}

/// One live connection to an agent, owned by exactly one worker task.
#[async_trait]
pub trait AgentConnection: Send {
    /// Submit a prompt and return the resulting message stream.
    ///
    /// The stream ends with [`AgentMessage::Terminal`] on a normal
    /// completion; an early end without one is tolerated by the caller.
    async fn send(&mut self, prompt: &str) -> Result<MessageStream, RelayError>;

    /// Ask the agent to abandon the in-flight request.
    ///
    /// Returning `Ok` means the agent acknowledged and the connection can
    /// serve another request.
    async fn interrupt(&mut self) -> Result<(), RelayError>;

    /// Tear the connection down. Called once, when the worker exits.
    async fn disconnect(&mut self) -> Result<(), RelayError>;
}
