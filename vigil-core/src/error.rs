//! Error types for vigil-core

use thiserror::Error;

/// Main error type for the vigil-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Durable storage error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery/API error
    #[error("delivery error: {0}")]
    Delivery(String),
}

/// Result type alias for vigil-core
pub type Result<T> = std::result::Result<T, Error>;
