//! # relay-settings
//!
//! Layered configuration for the relay bridge.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **User file** — `~/.relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `RELAY_*` overrides (highest priority)
//!
//! There is no process-global settings cache: behavior toggles travel as
//! explicit construction parameters, so callers load once at startup and
//! pass values down.
//!
//! # Usage
//!
//! ```no_run
//! let settings = relay_settings::load_settings().unwrap_or_default();
//! println!("request timeout: {} ms", settings.worker.request_timeout_ms);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
