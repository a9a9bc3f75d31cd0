//! Error types for cellarium.

use thiserror::Error;

/// Result type alias using cellarium's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cellarium operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Study file not found
    #[error("Study file not found: {0}")]
    StudyFileNotFound(uuid::Uuid),

    /// Job record not found
    #[error("Job record not found: {0}")]
    JobNotFound(String),

    /// Parameter validation failed; message lists every offending field
    #[error("Validation error: {0}")]
    Validation(String),

    /// Compute backend rejected or failed a request
    #[error("Batch error: {0}")]
    Batch(String),

    /// Launch deferred behind an unfinished sibling parse
    #[error("Ingest gated: {0}")]
    Gated(String),

    /// Job orchestration error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
