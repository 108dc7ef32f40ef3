//! HTTP API server for the stock ledger.
//!
//! Binds the mutation engine's commands to REST endpoints under `/api/v1`,
//! streams notifications over server-sent events, and exposes structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use engine::{DirectorySeed, InMemoryDirectory, MutationEngine};
use ledger_store::LedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use notify::{BroadcastTransport, NotificationPublisher};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Buffered notifications per SSE subscriber before it starts skipping.
const SUBSCRIBER_BUFFER: usize = 256;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub engine: MutationEngine<S, InMemoryDirectory>,
    pub transport: BroadcastTransport,
    pub metrics: PrometheusHandle,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LedgerStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/metrics", get(routes::metrics::get::<S>))
        .route("/api/v1/stock", get(routes::stock::query::<S>))
        .route("/api/v1/stock/init", post(routes::stock::initialize::<S>))
        .route("/api/v1/stock/increase", post(routes::stock::increase::<S>))
        .route("/api/v1/stock/decrease", post(routes::stock::decrease::<S>))
        .route("/api/v1/stock/move", post(routes::stock::transfer::<S>))
        .route("/api/v1/stock/adjust", post(routes::stock::adjust::<S>))
        .route("/api/v1/stock/moves", get(routes::stock::moves::<S>))
        .route("/api/v1/stock/events", get(routes::events::stream::<S>))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the engine over `store`, with notifications fanned out to SSE
/// subscribers. Must be called inside a tokio runtime; the returned handle is
/// the notification worker.
pub fn create_state<S: LedgerStore + 'static>(
    store: S,
    directory: InMemoryDirectory,
    config: &Config,
    metrics: PrometheusHandle,
) -> (Arc<AppState<S>>, JoinHandle<()>) {
    let transport = BroadcastTransport::new(SUBSCRIBER_BUFFER);
    let (publisher, worker) =
        NotificationPublisher::spawn(transport.clone(), config.publisher_config());
    let engine =
        MutationEngine::new(store, directory, publisher).with_config(config.engine_config());

    let state = Arc::new(AppState {
        engine,
        transport,
        metrics,
    });
    (state, worker)
}

/// Reads a JSON [`DirectorySeed`] from `path`.
pub async fn load_directory(path: &str) -> std::io::Result<InMemoryDirectory> {
    let raw = tokio::fs::read_to_string(path).await?;
    let seed: DirectorySeed = serde_json::from_str(&raw)?;
    tracing::info!(
        path,
        products = seed.products.len(),
        locations = seed.locations.len(),
        "loaded directory"
    );
    Ok(InMemoryDirectory::from_seed(seed))
}
