//! Stock query, mutation and history endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use common::{ActorId, LocationId, ProductId};
use engine::{
    Deliver, Initialize, MovementEntry, MovementKind, MovementQuery, Receive, Reconcile,
    StockQuery, StockRecord, StockView, Transfer, TransferResult,
};
use ledger_store::LedgerStore;
use serde::Deserialize;

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
}

/// Body of `increase` and `decrease`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub product_id: ProductId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub counted_qty: i64,
    pub reason: Option<String>,
    pub performed_by: Option<ActorId>,
}

#[derive(Debug, Deserialize)]
pub struct StockParams {
    pub product: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MovesParams {
    pub product: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(req)| req)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// -- Handlers --

/// GET /api/v1/stock: records matching `?product=&location=`, with product
/// and location details.
#[tracing::instrument(skip(state))]
pub async fn query<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<StockParams>, QueryRejection>,
) -> Result<Json<Vec<StockView>>, ApiError> {
    let params = params(query)?;
    let mut filter = StockQuery::new();
    if let Some(product) = params.product.as_deref() {
        filter = filter.product_id(parse_id::<ProductId>("product", product)?);
    }
    if let Some(location) = params.location.as_deref() {
        filter = filter.location_id(parse_id::<LocationId>("location", location)?);
    }

    Ok(Json(state.engine.query(filter).await?))
}

/// POST /api/v1/stock/init: set an opening quantity.
#[tracing::instrument(skip(state, payload))]
pub async fn initialize<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<InitRequest>, JsonRejection>,
) -> Result<Json<StockRecord>, ApiError> {
    let req = body(payload)?;
    let record = state
        .engine
        .initialize(Initialize::new(req.product_id, req.location_id, req.quantity))
        .await?;
    Ok(Json(record))
}

/// POST /api/v1/stock/increase: receive stock.
#[tracing::instrument(skip(state, payload))]
pub async fn increase<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<MovementRequest>, JsonRejection>,
) -> Result<Json<StockRecord>, ApiError> {
    let req = body(payload)?;
    let mut cmd = Receive::new(req.product_id, req.location_id, req.qty);
    cmd.reason = req.reason;
    cmd.performed_by = req.performed_by;

    Ok(Json(state.engine.receive(cmd).await?))
}

/// POST /api/v1/stock/decrease: deliver stock. 409 when not enough on hand.
#[tracing::instrument(skip(state, payload))]
pub async fn decrease<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<MovementRequest>, JsonRejection>,
) -> Result<Json<StockRecord>, ApiError> {
    let req = body(payload)?;
    let mut cmd = Deliver::new(req.product_id, req.location_id, req.qty);
    cmd.reason = req.reason;
    cmd.performed_by = req.performed_by;

    Ok(Json(state.engine.deliver(cmd).await?))
}

/// POST /api/v1/stock/move: transfer between locations.
#[tracing::instrument(skip(state, payload))]
pub async fn transfer<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<MoveRequest>, JsonRejection>,
) -> Result<Json<TransferResult>, ApiError> {
    let req = body(payload)?;
    let mut cmd = Transfer::new(
        req.product_id,
        req.from_location_id,
        req.to_location_id,
        req.qty,
    );
    cmd.reason = req.reason;
    cmd.performed_by = req.performed_by;

    Ok(Json(state.engine.transfer(cmd).await?))
}

/// POST /api/v1/stock/adjust: reconcile with a physical count.
#[tracing::instrument(skip(state, payload))]
pub async fn adjust<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<AdjustRequest>, JsonRejection>,
) -> Result<Json<StockRecord>, ApiError> {
    let req = body(payload)?;
    let mut cmd = Reconcile::new(req.product_id, req.location_id, req.counted_qty);
    cmd.reason = req.reason;
    cmd.performed_by = req.performed_by;

    Ok(Json(state.engine.reconcile(cmd).await?))
}

/// GET /api/v1/stock/moves: movement journal, newest first.
#[tracing::instrument(skip(state))]
pub async fn moves<S: LedgerStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<MovesParams>, QueryRejection>,
) -> Result<Json<Vec<MovementEntry>>, ApiError> {
    let params = params(query)?;
    let mut filter = MovementQuery::new();
    if let Some(product) = params.product.as_deref() {
        filter = filter.product_id(parse_id::<ProductId>("product", product)?);
    }
    if let Some(location) = params.location.as_deref() {
        filter = filter.location_id(parse_id::<LocationId>("location", location)?);
    }
    if let Some(kind) = params.kind.as_deref() {
        filter = filter.kind(parse_id::<MovementKind>("type", kind)?);
    }
    if let Some(from) = params.from {
        filter = filter.from_timestamp(from);
    }
    if let Some(to) = params.to {
        filter = filter.to_timestamp(to);
    }
    if let Some(limit) = params.limit {
        filter = filter.limit(limit);
    }
    if let Some(offset) = params.offset {
        filter = filter.offset(offset);
    }

    Ok(Json(state.engine.history(filter).await?))
}
