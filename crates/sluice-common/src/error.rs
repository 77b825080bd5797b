//! Error types shared across Sluice crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, SluiceError>;

/// Errors raised by the shared data model and configuration helpers
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing required config key '{0}'")]
    MissingConfig(String),

    #[error("Invalid value for config key '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported digest method: {0}")]
    UnsupportedDigest(String),
}

impl SluiceError {
    /// Create an invalid config error
    pub fn invalid_config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
