//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "RELAY_LOG";

/// Filter applied when `RELAY_LOG` is unset or unparseable.
const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RELAY_LOG` (same syntax as `RUST_LOG`), defaulting
/// to `info`; an unparseable value falls back to `info` with a warning.
/// Calling this more than once is harmless; later calls are no-ops.
pub fn init() {
    let raw = std::env::var(LOG_ENV).ok();
    let (filter, invalid) = parse_filter(raw.as_deref());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    if let Some(err) = invalid {
        tracing::warn!(error = %err, "invalid RELAY_LOG filter, using info");
    }
}

/// Parse a filter string, falling back to the default.
///
/// Returns the parse error alongside the fallback so the caller can report
/// it once a subscriber is installed.
fn parse_filter(raw: Option<&str>) -> (EnvFilter, Option<String>) {
    match raw {
        Some(raw) => match EnvFilter::try_new(raw) {
            Ok(filter) => (filter, None),
            Err(err) => (EnvFilter::new(DEFAULT_FILTER), Some(err.to_string())),
        },
        None => (EnvFilter::new(DEFAULT_FILTER), None),
    }
}
