//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use ledger_store::LedgerStore;

use crate::AppState;

/// GET /metrics: mutation and notification counters in Prometheus text format.
pub async fn get<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}
