//! Review endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use super::dto::{ActionResponse, CreateReviewRequest};
use super::listings::build_eligibility_service;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::Review;
use crate::error::AppError;

/// POST /api/v1/listings/:id/reviews
pub async fn create_review(
    State(state): State<AppState>,
    CurrentUser(author): CurrentUser,
    Path(listing_id): Path<String>,
    Json(req): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    let review = build_eligibility_service(&state)
        .record_review(&author, &listing_id, req.rating, &req.comment)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// POST /api/v1/reviews/:id/helpful
///
/// Best effort: unknown ids still answer 200.
pub async fn mark_helpful(
    State(state): State<AppState>,
    CurrentUser(_voter): CurrentUser,
    Path(review_id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    build_eligibility_service(&state)
        .mark_helpful(&review_id)
        .await?;
    Ok(Json(ActionResponse::new(review_id, "Marked as helpful")))
}
