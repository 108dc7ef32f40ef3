//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use ledger_store::LedgerStore;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub stream_subscribers: usize,
}

/// GET /health: liveness plus the number of connected SSE clients.
pub async fn check<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stream_subscribers: state.transport.subscriber_count(),
    })
}
