//! Error types for plugin authors

use thiserror::Error;

/// Errors that plugins can return from registration
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration error (bad or missing options slice)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
