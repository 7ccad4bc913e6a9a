//! Error types for the `SuperDuperAI` core library.

use thiserror::Error;

/// Result type alias using the core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Push envelope could not be interpreted
    #[error("Failed to parse event envelope: {0}")]
    EventParse(String),

    /// Event stream line exceeded the decoder's limit
    #[error("Event stream line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
