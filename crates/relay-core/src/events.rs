//! Event types for the bridge.
//!
//! Two event families:
//!
//! - **[`AgentMessage`]**: Raw messages read off one agent connection —
//!   partial text/thinking deltas, completed blocks, sub-task notices, and
//!   the terminal result. The vocabulary overlaps (the same text can arrive
//!   as deltas and again as the completed block covering them), which is why
//!   these are classified rather than forwarded.
//! - **[`RelayEvent`]**: Classified outward events, one per transport frame,
//!   strictly ordered per request with a guaranteed terminal `done`.
//!
//! `AgentMessage` is ephemeral — consumed once by the classifier and
//! discarded. `RelayEvent` is what callers actually see.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the tool invocation that delegates work to a sub-agent.
pub const DELEGATION_TOOL: &str = "Task";

// ─────────────────────────────────────────────────────────────────────────────
// AgentMessage — raw connection stream
// ─────────────────────────────────────────────────────────────────────────────

/// Which generation channel a partial delta belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaChannel {
    /// Visible reply text.
    Text,
    /// Reasoning text.
    Thinking,
}

/// Content of a completed block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockContent {
    /// A finalized unit of reply text.
    Text {
        /// Full text of the block, covering any prior deltas.
        text: String,
    },
    /// A tool invocation constructed by the agent.
    ToolInvocation {
        /// Tool name. [`DELEGATION_TOOL`] marks sub-agent delegation.
        name: String,
        /// Invocation parameters.
        #[serde(default)]
        params: Map<String, Value>,
    },
}

/// Sub-task lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskPhase {
    /// The delegated unit started.
    Started,
    /// The delegated unit finished.
    Stopped,
}

/// A raw message from the agent connection.
///
/// Messages originating inside a delegated sub-task carry a `parent_task`
/// tag; their content never surfaces to the caller directly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Incremental fragment of generated text or reasoning.
    PartialDelta {
        /// Which channel the fragment belongs to.
        channel: DeltaChannel,
        /// The fragment.
        text: String,
        /// Set when the fragment originates inside a delegated sub-task.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_task: Option<String>,
    },
    /// A finalized block (text or tool invocation).
    CompletedBlock {
        /// Block content.
        block: BlockContent,
        /// Set when the block originates inside a delegated sub-task.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_task: Option<String>,
    },
    /// A delegated sub-task started or stopped.
    SubTask {
        /// Lifecycle phase.
        phase: SubTaskPhase,
        /// Name of the delegated agent.
        agent: String,
        /// Human-readable task description.
        task: String,
        /// Tag identifying this sub-task in later tagged messages.
        task_id: String,
    },
    /// Terminal result closing out one request's stream.
    #[serde(rename = "result")]
    Terminal {
        /// Usage counters for the request.
        usage: TokenUsage,
    },
}

impl AgentMessage {
    /// The sub-task tag carried by this message, if any.
    #[must_use]
    pub fn parent_task(&self) -> Option<&str> {
        match self {
            Self::PartialDelta { parent_task, .. } | Self::CompletedBlock { parent_task, .. } => {
                parent_task.as_deref()
            }
            Self::SubTask { .. } | Self::Terminal { .. } => None,
        }
    }
}

/// Token usage counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input: u64,
    /// Output tokens produced.
    pub output: u64,
}

impl TokenUsage {
    /// Accumulate another usage record, saturating on overflow.
    pub fn add(&mut self, other: TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RelayEvent — classified outward stream
// ─────────────────────────────────────────────────────────────────────────────

/// Status of a delegated sub-agent in an `agent_activity` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The delegated unit is in flight.
    Running,
    /// The delegated unit finished.
    Completed,
}

/// An outward event pushed to a caller, one per transport frame.
///
/// Events for one request are strictly ordered; [`RelayEvent::Done`] is
/// always last and occurs exactly once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// Reasoning fragment.
    Thinking {
        /// The fragment.
        text: String,
    },
    /// Reply text fragment; concatenation of fragments is the full reply.
    Text {
        /// The fragment.
        text: String,
    },
    /// A delegated sub-task started or completed.
    AgentActivity {
        /// Delegated agent name.
        agent: String,
        /// Running or completed.
        status: AgentStatus,
        /// Task description.
        task: String,
    },
    /// A non-delegation tool invocation.
    ToolCall {
        /// Tool name.
        tool: String,
        /// Invocation parameters.
        #[serde(default)]
        params: Map<String, Value>,
    },
    /// A user-visible failure; zero or more, always before `done`.
    Error {
        /// Human-readable message.
        message: String,
        /// Whether the session remains usable.
        recoverable: bool,
    },
    /// Terminal event; exactly one per request, always last.
    Done {
        /// Usage counters for the request.
        tokens_used: TokenUsage,
        /// Delegated agent names observed during the request.
        agents_used: Vec<String>,
    },
}

impl RelayEvent {
    /// The wire-level type string for this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::Text { .. } => "text",
            Self::AgentActivity { .. } => "agent_activity",
            Self::ToolCall { .. } => "tool_call",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    /// Whether this event closes out a request's sequence.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// Whether this event is an incremental fragment eligible for coalescing.
    #[must_use]
    pub fn is_delta(&self) -> bool {
        matches!(self, Self::Text { .. } | Self::Thinking { .. })
    }

    /// Merge a same-channel delta into this one under backpressure.
    ///
    /// Returns false (leaving both untouched) when the kinds differ —
    /// coalescing never reorders events across channels.
    pub fn coalesce(&mut self, other: &RelayEvent) -> bool {
        match (self, other) {
            (Self::Text { text }, Self::Text { text: more })
            | (Self::Thinking { text }, Self::Thinking { text: more }) => {
                text.push_str(more);
                true
            }
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
