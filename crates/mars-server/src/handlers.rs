//! API route handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use mars_core::Transaction;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{
    HealthResponse, ReplayResponse, TransactionSummary, TransactionsQuery, TransactionsResponse,
    MAX_LIMIT,
};
use crate::state::AppState;

/// GET /api/health - Liveness and configuration summary.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: state.recorder.storage().is_some(),
    })
}

/// GET /api/transactions - Most recent transactions, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<TransactionsResponse>> {
    let limit = query.limit.min(MAX_LIMIT);
    let recent = state.storage()?.recent(limit)?;
    debug!(limit, count = recent.len(), "Listing transactions");

    Ok(Json(TransactionsResponse {
        transactions: recent.iter().map(TransactionSummary::from).collect(),
    }))
}

/// GET /api/transactions/{id} - Full transaction record.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Transaction>> {
    let tx = state.storage()?.get(&id)?;
    Ok(Json(tx))
}

/// POST /api/transactions/{id}/replay - Re-send a stored request.
pub async fn replay_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<ReplayResponse>)> {
    state.recorder.replay(&id)?;
    info!(id = %id, "Replay requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(ReplayResponse {
            id,
            status: "replaying".to_string(),
        }),
    ))
}
