//! HTTP API server with observability for the invoice service.
//!
//! Provides REST endpoints for invoice aggregates under `/inv`, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use invoice_store::InvoiceStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::invoices::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: InvoiceStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/inv",
            get(routes::invoices::list::<S>).post(routes::invoices::create::<S>),
        )
        .route("/inv/items", get(routes::invoices::list_items::<S>))
        .route(
            "/inv/{id}",
            get(routes::invoices::get::<S>)
                .put(routes::invoices::update::<S>)
                .delete(routes::invoices::delete::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wraps a store in shared application state.
pub fn create_state<S: InvoiceStore>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState::new(store))
}
