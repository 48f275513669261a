//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON wire
//! format, implement [`Default`] with production values, and accept partial
//! JSON via `#[serde(default)]` — missing fields get their default during
//! deserialization.

use serde::{Deserialize, Serialize};

/// Root settings type for the relay bridge.
///
/// Loaded from `~/.relay/settings.json` with defaults applied for missing
/// fields; `RELAY_*` environment variables override specific values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Session worker behavior.
    pub worker: WorkerSettings,
    /// Agent runtime parameters passed through to the connection.
    pub agent: AgentSettings,
    /// Knowledge-store location.
    pub memory: MemorySettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "relay".to_string(),
            worker: WorkerSettings::default(),
            agent: AgentSettings::default(),
            memory: MemorySettings::default(),
        }
    }
}

impl RelaySettings {
    /// Correct nonsensical values in place.
    ///
    /// Called automatically during loading. Zero capacities and timeouts are
    /// clamped with a warning rather than rejected, so users get corrected
    /// behavior instead of a confusing error.
    pub fn validate(&mut self) {
        fn clamp_min_u64(val: &mut u64, min: u64, name: &str) {
            if *val < min {
                tracing::warn!("{name} too small ({val}), clamped to {min}");
                *val = min;
            }
        }
        fn clamp_min_usize(val: &mut usize, min: usize, name: &str) {
            if *val < min {
                tracing::warn!("{name} too small ({val}), clamped to {min}");
                *val = min;
            }
        }

        let w = &mut self.worker;
        clamp_min_u64(&mut w.request_timeout_ms, 1, "worker.requestTimeoutMs");
        clamp_min_u64(&mut w.cancel_grace_ms, 1, "worker.cancelGraceMs");
        clamp_min_u64(&mut w.shutdown_timeout_ms, 1, "worker.shutdownTimeoutMs");
        clamp_min_usize(&mut w.reply_capacity, 1, "worker.replyCapacity");
        clamp_min_usize(&mut w.inbound_capacity, 1, "worker.inboundCapacity");
        clamp_min_usize(&mut w.max_sessions, 1, "worker.maxSessions");
    }
}

/// Session worker behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Per-request inactivity timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Grace window for cancellation acknowledgement after a timeout.
    pub cancel_grace_ms: u64,
    /// Bound on orderly worker shutdown before forced teardown.
    pub shutdown_timeout_ms: u64,
    /// Capacity of each request's reply channel.
    pub reply_capacity: usize,
    /// Capacity of a worker's inbound request queue.
    pub inbound_capacity: usize,
    /// Sessions idle longer than this are evicted.
    pub idle_timeout_ms: u64,
    /// Maximum live sessions (workers) at once.
    pub max_sessions: usize,
    /// Strip nested-session markers when spawning the agent, so a bridged
    /// agent does not detect itself as running inside another session.
    pub suppress_nested_session: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 600_000,
            cancel_grace_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            reply_capacity: 256,
            inbound_capacity: 32,
            idle_timeout_ms: 1_800_000,
            max_sessions: 64,
            suppress_nested_session: true,
        }
    }
}

/// Agent runtime parameters passed through to the connection layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Model identifier for the orchestrating agent.
    pub model: String,
    /// Maximum agent turns per request.
    pub max_turns: u32,
    /// Per-session spend budget in USD.
    pub max_budget_usd: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "claude-opus-4-1".to_string(),
            max_turns: 50,
            max_budget_usd: 10.0,
        }
    }
}

/// Knowledge-store location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// Root directory for named documents and categorized insight files.
    pub dir: String,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            dir: "~/.relay/memory".to_string(),
        }
    }
}
