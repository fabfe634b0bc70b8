//! Error types for transaction handling.

use thiserror::Error;

/// Failure to rebuild a request from a stored dump.
#[derive(Debug, Error)]
pub enum RestoreError {
    /// Stored method is not a valid HTTP method.
    #[error("invalid method: {0}")]
    InvalidMethod(String),

    /// Stored URL cannot be parsed or is not absolute.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Stored header name or value is not valid on the wire.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Request assembly failed.
    #[error("failed to build request: {0}")]
    Build(#[from] hyper::http::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, RestoreError>;
