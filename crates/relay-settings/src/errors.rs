//! Settings error types.

use thiserror::Error;

/// Convenience alias for settings results.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors from loading or parsing settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON for the schema.
    #[error("failed to parse settings JSON: {0}")]
    Parse(#[from] serde_json::Error),
}
