//! API request and response models.

use chrono::{DateTime, Utc};
use mars_core::Transaction;
use serde::{Deserialize, Serialize};

/// Query parameters for GET /api/transactions.
#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Upper bound on `limit`.
pub const MAX_LIMIT: usize = 1000;

/// One row of the transaction listing.
#[derive(Debug, Serialize)]
pub struct TransactionSummary {
    pub id: String,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub error: Option<String>,
    pub client_ip: String,
    pub server_ip: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
}

impl From<&Transaction> for TransactionSummary {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            method: tx.request.method.clone(),
            url: tx.request.url.clone(),
            status: tx.status(),
            error: tx.error().map(str::to_string),
            client_ip: tx.client_ip.clone(),
            server_ip: tx.server_ip.clone(),
            start_time: tx.start_time,
            duration_ms: tx.duration.as_millis() as u64,
        }
    }
}

/// Response body for GET /api/transactions.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<TransactionSummary>,
}

/// Response body for POST /api/transactions/{id}/replay.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub id: String,
    pub status: String,
}

/// Response body for GET /api/health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: bool,
}
