//! Classification of the raw agent stream into outward events.
//!
//! The raw stream is redundant: the same reply text arrives once as partial
//! deltas and again inside the completed block covering them, and messages
//! produced inside delegated sub-tasks are interleaved with the top-level
//! conversation. The classifier deduplicates and filters so callers see each
//! piece of content exactly once:
//!
//! - Deltas stream through immediately and set a boundary flag.
//! - A completed text block is forwarded only when no delta streamed since
//!   the last boundary; any non-delta message resets the flag.
//! - Sub-task-tagged messages are dropped; the sub-task surfaces only as
//!   `agent_activity` notices.
//! - The delegation tool invocation becomes `agent_activity(running)`
//!   instead of a `tool_call`.
//!
//! One classifier serves one request. [`Classifier::finish`] guarantees the
//! terminal `done` even when the stream ends without one.

use relay_core::{
    AgentMessage, AgentStatus, BlockContent, DELEGATION_TOOL, DeltaChannel, RelayEvent,
    SubTaskPhase, TokenUsage,
};
use serde_json::Value;

/// Per-request stream classifier.
#[derive(Debug, Default)]
pub struct Classifier {
    /// Whether a delta streamed since the last non-delta boundary. Governs
    /// completed-text-block suppression.
    streamed_since_boundary: bool,
    /// Delegated agent names observed, in first-use order, deduplicated.
    agents_used: Vec<String>,
    /// Whether the terminal event was produced.
    done: bool,
}

impl Classifier {
    /// Create a classifier for one request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal event was already produced.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Classify one raw message, returning the outward event if any.
    pub fn classify(&mut self, message: AgentMessage) -> Option<RelayEvent> {
        if self.done || message.parent_task().is_some() {
            return None;
        }
        match message {
            AgentMessage::PartialDelta { channel, text, .. } => {
                self.streamed_since_boundary = true;
                Some(match channel {
                    DeltaChannel::Text => RelayEvent::Text { text },
                    DeltaChannel::Thinking => RelayEvent::Thinking { text },
                })
            }
            AgentMessage::CompletedBlock { block, .. } => match block {
                BlockContent::Text { text } => {
                    let streamed = self.streamed_since_boundary;
                    self.streamed_since_boundary = false;
                    if streamed {
                        None
                    } else {
                        Some(RelayEvent::Text { text })
                    }
                }
                BlockContent::ToolInvocation { name, params } => {
                    self.streamed_since_boundary = false;
                    if name == DELEGATION_TOOL {
                        let agent = params
                            .get("subagent_type")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_owned();
                        let task = params
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned();
                        self.record_agent(&agent);
                        Some(RelayEvent::AgentActivity {
                            agent,
                            status: AgentStatus::Running,
                            task,
                        })
                    } else {
                        Some(RelayEvent::ToolCall { tool: name, params })
                    }
                }
            },
            AgentMessage::SubTask {
                phase, agent, task, ..
            } => {
                self.streamed_since_boundary = false;
                self.record_agent(&agent);
                let status = match phase {
                    SubTaskPhase::Started => AgentStatus::Running,
                    SubTaskPhase::Stopped => AgentStatus::Completed,
                };
                Some(RelayEvent::AgentActivity {
                    agent,
                    status,
                    task,
                })
            }
            AgentMessage::Terminal { usage } => {
                self.done = true;
                Some(RelayEvent::Done {
                    tokens_used: usage,
                    agents_used: self.agents_used.clone(),
                })
            }
        }
    }

    /// Produce the fallback terminal event when the stream ended without one.
    ///
    /// Returns `None` when a terminal was already classified, so callers can
    /// unconditionally chain this after draining the stream.
    pub fn finish(&mut self) -> Option<RelayEvent> {
        if self.done {
            return None;
        }
        self.done = true;
        Some(RelayEvent::Done {
            tokens_used: TokenUsage::default(),
            agents_used: self.agents_used.clone(),
        })
    }

    fn record_agent(&mut self, agent: &str) {
        if !self.agents_used.iter().any(|a| a == agent) {
            self.agents_used.push(agent.to_owned());
        }
    }
}
