//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registers descriptions for the metrics the repository emits.
pub fn describe() {
    metrics::describe_counter!(
        "invoice_operations_total",
        "Invoice repository reads and writes by outcome"
    );
    metrics::describe_histogram!(
        "invoice_operation_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of invoice repository reads and writes"
    );
    metrics::describe_counter!(
        "invoice_transactions_rolled_back_total",
        "Store transactions rolled back after a failed statement"
    );
}

/// GET /metrics: Prometheus exposition of the invoice operation metrics.
pub async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render())
}
