//! Error types for the proxy.

use std::path::PathBuf;

use mars_core::RestoreError;
use mars_storage::StorageError;
use thiserror::Error;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// CA certificate error.
    #[error("CA error: {0}")]
    Ca(#[from] CaError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Proxy server error.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// CA loading error type.
#[derive(Debug, Error)]
pub enum CaError {
    /// CA files are not present.
    #[error("CA certificate not found (expected {cert:?} and {key:?})")]
    Missing { cert: PathBuf, key: PathBuf },

    /// Failed to read CA files.
    #[error("Failed to read CA: {0}")]
    Read(#[from] std::io::Error),

    /// Failed to parse CA certificate or key.
    #[error("Failed to parse CA: {0}")]
    Parse(String),
}

/// Replay failure, reported to the caller of [`Recorder::replay`](crate::Recorder::replay).
#[derive(Debug, Error)]
pub enum ReplayError {
    /// No storage is configured to look transactions up in.
    #[error("replay requires a storage backend")]
    NotConfigured,

    /// The transaction could not be loaded.
    #[error("failed to load transaction {id}: {source}")]
    Lookup {
        id: String,
        #[source]
        source: StorageError,
    },

    /// The stored request could not be rebuilt.
    #[error("failed to rebuild request for transaction {id}: {source}")]
    Restore {
        id: String,
        #[source]
        source: RestoreError,
    },
}

impl ReplayError {
    /// Whether the transaction id is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplayError::Lookup { source, .. } if source.is_not_found())
    }
}

/// Invalid parent proxy setting.
#[derive(Debug, Error)]
#[error("invalid parent proxy {value:?}: {reason}")]
pub struct UpstreamError {
    pub value: String,
    pub reason: String,
}

/// Failure to obtain a response from the upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Builds a message from an error and all of its sources.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self(message)
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
