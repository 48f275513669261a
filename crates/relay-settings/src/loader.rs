//! Settings loading: compiled defaults ← user file ← environment.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Default location of the user settings file.
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".relay").join("settings.json")
}

/// Deep-merge `overlay` into `base`.
///
/// Objects merge key-by-key recursively; any other value in `overlay`
/// replaces the base value wholesale.
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file path.
///
/// A missing file is not an error — defaults apply. The parsed result is
/// deep-merged over defaults, then `RELAY_*` environment overrides are
/// applied and the result validated.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;
    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file)
    } else {
        defaults
    };
    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides_from(&mut settings, |name| std::env::var(name).ok());
    settings.validate();
    Ok(settings)
}

/// Apply `RELAY_*` overrides read through `get`.
///
/// Taking the lookup as a parameter keeps this testable without mutating
/// process-wide environment state.
pub fn apply_env_overrides_from(
    settings: &mut RelaySettings,
    get: impl Fn(&str) -> Option<String>,
) {
    fn parse<T: std::str::FromStr>(raw: &str, name: &str) -> Option<T> {
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("ignoring unparseable {name}={raw}");
                None
            }
        }
    }

    let overrides_u64: [(&str, &mut u64); 4] = [
        ("RELAY_REQUEST_TIMEOUT_MS", &mut settings.worker.request_timeout_ms),
        ("RELAY_CANCEL_GRACE_MS", &mut settings.worker.cancel_grace_ms),
        ("RELAY_SHUTDOWN_TIMEOUT_MS", &mut settings.worker.shutdown_timeout_ms),
        ("RELAY_IDLE_TIMEOUT_MS", &mut settings.worker.idle_timeout_ms),
    ];
    for (name, slot) in overrides_u64 {
        if let Some(raw) = get(name) {
            if let Some(value) = parse(&raw, name) {
                *slot = value;
            }
        }
    }

    if let Some(raw) = get("RELAY_MAX_SESSIONS") {
        if let Some(value) = parse(&raw, "RELAY_MAX_SESSIONS") {
            settings.worker.max_sessions = value;
        }
    }
    if let Some(raw) = get("RELAY_SUPPRESS_NESTED_SESSION") {
        if let Some(value) = parse(&raw, "RELAY_SUPPRESS_NESTED_SESSION") {
            settings.worker.suppress_nested_session = value;
        }
    }
    if let Some(model) = get("RELAY_MODEL") {
        settings.agent.model = model;
    }
    if let Some(raw) = get("RELAY_MAX_TURNS") {
        if let Some(value) = parse(&raw, "RELAY_MAX_TURNS") {
            settings.agent.max_turns = value;
        }
    }
    if let Some(raw) = get("RELAY_MAX_BUDGET_USD") {
        if let Some(value) = parse(&raw, "RELAY_MAX_BUDGET_USD") {
            settings.agent.max_budget_usd = value;
        }
    }
    if let Some(dir) = get("RELAY_MEMORY_DIR") {
        settings.memory.dir = dir;
    }
}
