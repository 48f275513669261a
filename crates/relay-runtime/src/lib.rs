//! # relay-runtime
//!
//! Session-affine execution runtime: the bridge between callers issuing
//! prompts and agents that must be driven over long-lived, single-owner
//! connections.
//!
//! ## Architecture
//!
//! ```text
//!  caller ──▶ SessionRegistry ──▶ SessionWorker (one task, owns the
//!                 │                  AgentConnection for its lifetime)
//!                 │                      │
//!                 │                  Classifier (dedup, sub-task filter)
//!                 │                      │
//!                 ▼                      ▼
//!          LifecycleManager        reply channel ──▶ EventSink
//! ```
//!
//! - [`registry::SessionRegistry`] maps session ids to live workers and
//!   guarantees at most one worker per session.
//! - [`worker::SessionWorker`] runs one task that owns one
//!   [`connection::AgentConnection`]; requests queue FIFO.
//! - [`classifier::Classifier`] turns the redundant raw stream into the
//!   outward event sequence with a guaranteed terminal `done`.
//! - [`lifecycle::LifecycleManager`] evicts broken workers and sweeps idle
//!   sessions in the background.
//! - [`sink::EventSink`] frames outward events as JSON lines.
//! - [`knowledge::KnowledgeStore`] is the shared read/append store agents
//!   use across sessions.

#![deny(unsafe_code)]

pub mod classifier;
pub mod connection;
pub mod knowledge;
pub mod lifecycle;
pub mod registry;
pub mod sink;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::Classifier;
pub use connection::{AgentConnection, AgentConnector, ConnectOptions, MessageStream};
pub use knowledge::{FileKnowledgeStore, KnowledgeStore};
pub use lifecycle::LifecycleManager;
pub use registry::SessionRegistry;
pub use sink::{EventSink, forward_events};
pub use worker::{SessionWorker, WorkerOptions, WorkerRequest};
