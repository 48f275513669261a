//! # relay-core
//!
//! Foundation types for the relay bridge — the shared vocabulary the
//! runtime crates depend on:
//!
//! - **Events**: [`events::AgentMessage`] for the raw multiplexed stream read
//!   off an agent connection, [`events::RelayEvent`] for the classified
//!   outward stream pushed to callers
//! - **Errors**: [`errors::RelayError`] taxonomy via `thiserror`
//! - **Sessions**: [`session::Session`] identity and [`session::WorkerState`]
//!   worker lifecycle states
//! - **Logging**: [`logging::init`] tracing subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by relay-settings and relay-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod logging;
pub mod session;

pub use errors::RelayError;
pub use events::{
    AgentMessage, AgentStatus, BlockContent, DELEGATION_TOOL, DeltaChannel, RelayEvent,
    SubTaskPhase, TokenUsage,
};
pub use session::{Session, WorkerState};
