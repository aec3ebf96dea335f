//! Core error types for pwsync.

/// Errors originating from core operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Configuration file read/write error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// User cancelled an interactive prompt.
    #[error("prompt cancelled by user")]
    Cancelled,

    /// Secret storage failed.
    #[error("keyring error: {0}")]
    Keyring(String),
}

/// Configuration-specific errors.
///
/// These are raised before any network call is made, so the operation that
/// needed the value is never started.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings file {path}: {source}")]
    ReadFile {
        /// Path of the settings file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write settings file.
    #[error("failed to write settings file {path}: {source}")]
    WriteFile {
        /// Path of the settings file.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse settings.
    #[error("failed to parse settings: {0}")]
    Parse(String),

    /// Missing required configuration.
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// A value is present but not acceptable for its key.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Settings key.
        key: String,
        /// Offending value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The key is not a known setting.
    #[error("unknown setting: {0}")]
    UnknownKey(String),
}
