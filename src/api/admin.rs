//! Admin API endpoints
//!
//! Moderation, integrity checks and marketplace statistics.
//! The router is wrapped in `require_admin`; handlers still take
//! `AdminUser` so the identity reaches every service call.

use axum::{
    Router, middleware,
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post},
};

use super::dto::{ActionResponse, ListingQueueParams, RejectListingRequest, RepairRequest};
use super::listings::{build_eligibility_service, build_listing_service};
use crate::AppState;
use crate::auth::{AdminUser, require_admin};
use crate::data::Listing;
use crate::error::AppError;
use crate::service::{IntegrityReport, IntegrityService, MarketplaceStats, RepairSummary, UserService};

/// Create admin router
///
/// Routes:
/// - GET /admin/listings?status= - Moderation queue
/// - POST /admin/listings/:id/approve - Approve pending listing
/// - POST /admin/listings/:id/reject - Reject pending listing
/// - DELETE /admin/listings/:id - Remove listing
/// - DELETE /admin/reviews/:id - Remove review
/// - GET /admin/integrity - Audit report
/// - POST /admin/integrity/repair - Prune dangling purchase items
/// - GET /admin/stats - Marketplace totals
/// - GET /admin/metrics - Prometheus metrics
pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        // Moderation
        .route("/listings", get(list_listings))
        .route("/listings/:id/approve", post(approve_listing))
        .route("/listings/:id/reject", post(reject_listing))
        .route("/listings/:id", delete(remove_listing))
        .route("/reviews/:id", delete(remove_review))
        // Integrity
        .route("/integrity", get(integrity_report))
        .route("/integrity/repair", post(integrity_repair))
        // Reporting
        .route("/stats", get(stats))
        .merge(super::metrics_router())
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

// =============================================================================
// Moderation
// =============================================================================

/// GET /admin/listings
async fn list_listings(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(params): Query<ListingQueueParams>,
) -> Result<Json<Vec<Listing>>, AppError> {
    let listings = build_listing_service(&state)
        .queue(&admin, params.status()?)
        .await?;
    Ok(Json(listings))
}

/// POST /admin/listings/:id/approve
async fn approve_listing(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Listing>, AppError> {
    let listing = build_listing_service(&state).approve(&admin, &id).await?;
    Ok(Json(listing))
}

/// POST /admin/listings/:id/reject
async fn reject_listing(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<RejectListingRequest>,
) -> Result<Json<Listing>, AppError> {
    let listing = build_listing_service(&state)
        .reject(&admin, &id, &req.reason)
        .await?;
    Ok(Json(listing))
}

/// DELETE /admin/listings/:id
async fn remove_listing(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    build_listing_service(&state).remove(&admin, &id).await?;
    Ok(Json(ActionResponse::new(id, "Listing removed")))
}

/// DELETE /admin/reviews/:id
async fn remove_review(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    build_eligibility_service(&state)
        .delete_review(&admin, &id)
        .await?;
    Ok(Json(ActionResponse::new(id, "Review removed")))
}

// =============================================================================
// Integrity
// =============================================================================

/// GET /admin/integrity
async fn integrity_report(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<IntegrityReport>, AppError> {
    let report = IntegrityService::new(state.db.clone()).audit().await?;
    Ok(Json(report))
}

/// POST /admin/integrity/repair
///
/// Destructive; the body must carry `{"confirm": true}`.
async fn integrity_repair(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    body: Option<Json<RepairRequest>>,
) -> Result<Json<RepairSummary>, AppError> {
    let confirmed = body.is_some_and(|Json(req)| req.confirm);
    let summary = IntegrityService::new(state.db.clone())
        .repair(&admin, confirmed)
        .await?;
    Ok(Json(summary))
}

// =============================================================================
// Reporting
// =============================================================================

/// GET /admin/stats
async fn stats(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
) -> Result<Json<MarketplaceStats>, AppError> {
    let stats = UserService::new(state.db.clone()).stats(&admin).await?;
    Ok(Json(stats))
}
