//! API layer
//!
//! HTTP handlers for:
//! - Marketplace API (catalog, listings, reviews, purchases, checkout)
//! - Payment provider webhook
//! - Admin API
//! - Metrics (Prometheus)

mod admin;
mod dto;
mod listings;
pub mod metrics;
mod purchases;
mod reviews;

pub use dto::*;

pub use admin::admin_router;
pub use metrics::metrics_router;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::AppState;
use crate::auth::require_auth;

/// Create marketplace API router
///
/// Routes are split into public and authenticated endpoints.
pub fn marketplace_api_router(state: AppState) -> Router<AppState> {
    // Public endpoints (no authentication required)
    let public_routes = Router::new()
        .route("/v1/listings", get(listings::search_catalog))
        .route("/v1/listings/:id", get(listings::get_listing))
        .route("/v1/listings/:id/reviews", get(listings::list_reviews))
        .route(
            "/v1/listings/:id/eligibility",
            get(listings::get_eligibility),
        )
        // Authenticated by signature, not by session
        .route("/v1/payments/webhook", post(purchases::payment_webhook));

    // Authenticated endpoints (require valid token)
    let authenticated_routes = Router::new()
        .route("/v1/me", get(purchases::me))
        .route("/v1/listings", post(listings::submit_listing))
        .route("/v1/listings/mine", get(listings::my_listings))
        .route("/v1/listings/:id", delete(listings::withdraw_listing))
        .route("/v1/listings/:id/reviews", post(reviews::create_review))
        .route("/v1/reviews/:id/helpful", post(reviews::mark_helpful))
        .route("/v1/purchases", get(purchases::list_purchases))
        .route("/v1/checkout", post(purchases::start_checkout))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    public_routes.merge(authenticated_routes)
}
