//! Common error types for SnipMaster.

use thiserror::Error;

/// Top-level error type for SnipMaster operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Durable storage could not be opened (absent, blocked or corrupt).
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Storage operation failed after the store was opened.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote authority rejected or failed to acknowledge a record.
    #[error("Remote sync failed: {0}")]
    RemoteSync(String),

    /// Network request failed before a response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// A response could not be written into a cache.
    #[error("Cache write failed: {0}")]
    CacheWrite(String),

    /// The platform refused to register a background task.
    #[error("Background registration failed: {0}")]
    BackgroundRegistration(String),

    /// Configuration is missing or invalid.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
