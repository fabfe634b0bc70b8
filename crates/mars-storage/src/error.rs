//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage and output operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from rusqlite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (e.g., creating directories, writing output files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    NotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reported by a custom backend.
    #[error("{0}")]
    Backend(String),
}

impl StorageError {
    /// Whether this error means the transaction does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
