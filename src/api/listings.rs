//! Listing endpoints
//!
//! Catalog browsing, listing detail, seller submissions and withdrawals.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

use super::dto::ActionResponse;
use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser};
use crate::data::{CatalogEntry, Listing, Review};
use crate::error::AppError;
use crate::service::{
    CatalogFilter, CatalogPage, CatalogParams, CatalogService, Eligibility, EligibilityService,
    ListingDraft, ListingService,
};

fn build_catalog_service(state: &AppState) -> CatalogService {
    CatalogService::new(state.db.clone())
}

pub(super) fn build_listing_service(state: &AppState) -> ListingService {
    ListingService::new(state.db.clone(), state.config.catalog.clone())
}

pub(super) fn build_eligibility_service(state: &AppState) -> EligibilityService {
    EligibilityService::new(state.db.clone())
}

/// GET /api/v1/listings
///
/// Query: `q`, `category`, `price`, `min_price`, `max_price`,
/// `min_rating`, `sort`.
pub async fn search_catalog(
    State(state): State<AppState>,
    Query(params): Query<CatalogParams>,
) -> Result<Json<CatalogPage>, AppError> {
    let filter = CatalogFilter::try_from(params)?;
    let page = build_catalog_service(&state).search(&filter).await?;
    Ok(Json(page))
}

/// GET /api/v1/listings/:id
pub async fn get_listing(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<String>,
) -> Result<Json<CatalogEntry>, AppError> {
    let entry = build_catalog_service(&state)
        .get_entry(&id, viewer.as_ref())
        .await?;
    Ok(Json(entry))
}

/// GET /api/v1/listings/:id/reviews
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Review>>, AppError> {
    let reviews = build_eligibility_service(&state).reviews_for(&id).await?;
    Ok(Json(reviews))
}

/// GET /api/v1/listings/:id/eligibility
///
/// Anonymous callers get `false` for both.
pub async fn get_eligibility(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(id): Path<String>,
) -> Result<Json<Eligibility>, AppError> {
    let eligibility = build_eligibility_service(&state)
        .eligibility(viewer.as_ref(), &id)
        .await?;
    Ok(Json(eligibility))
}

/// POST /api/v1/listings
pub async fn submit_listing(
    State(state): State<AppState>,
    CurrentUser(seller): CurrentUser,
    Json(draft): Json<ListingDraft>,
) -> Result<(StatusCode, Json<Listing>), AppError> {
    let listing = build_listing_service(&state).submit(&seller, draft).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// GET /api/v1/listings/mine
pub async fn my_listings(
    State(state): State<AppState>,
    CurrentUser(seller): CurrentUser,
) -> Result<Json<Vec<Listing>>, AppError> {
    let listings = build_listing_service(&state).mine(&seller).await?;
    Ok(Json(listings))
}

/// DELETE /api/v1/listings/:id
///
/// Sellers may withdraw their own listing while it is pending.
pub async fn withdraw_listing(
    State(state): State<AppState>,
    CurrentUser(seller): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    build_listing_service(&state).delete(&seller, &id).await?;
    Ok(Json(ActionResponse::new(id, "Listing withdrawn")))
}
