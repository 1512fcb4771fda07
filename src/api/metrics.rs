//! Prometheus exposition for the marketplace counters
//!
//! Serves everything registered in `crate::metrics::REGISTRY`: catalog
//! queries, listing transitions, purchases and revenue, reviews, payment
//! webhook outcomes, integrity audits and repairs, and error responses.
//! Mounted under `/admin`, so only administrators can scrape it.

use axum::{
    Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;

/// GET /admin/metrics
async fn export_metrics() -> Response {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();

    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, families = families.len(), "Failed to encode marketplace metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        }
    }
}

/// Router exposing `/metrics`
pub fn metrics_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/metrics", get(export_metrics))
}
