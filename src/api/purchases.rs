//! Purchase, checkout and account endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};

use super::dto::CheckoutRequest;
use super::listings::build_eligibility_service;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::data::{Purchase, User};
use crate::error::AppError;
use crate::payment::{CheckoutHandle, SIGNATURE_HEADER};
use crate::service::{CheckoutService, UserService, WebhookAck};

fn build_checkout_service(state: &AppState) -> CheckoutService {
    CheckoutService::new(
        state.db.clone(),
        state.payments.clone(),
        state.config.payment.clone(),
    )
}

/// GET /api/v1/me
///
/// Records the caller on first visit.
pub async fn me(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<User>, AppError> {
    let user = UserService::new(state.db.clone()).touch(&identity).await?;
    Ok(Json(user))
}

/// GET /api/v1/purchases
///
/// Items are shown as captured, even when the listing is gone.
pub async fn list_purchases(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<Vec<Purchase>>, AppError> {
    let purchases = build_eligibility_service(&state)
        .purchases(&identity)
        .await?;
    Ok(Json(purchases))
}

/// POST /api/v1/checkout
pub async fn start_checkout(
    State(state): State<AppState>,
    CurrentUser(buyer): CurrentUser,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutHandle>, AppError> {
    let handle = build_checkout_service(&state)
        .start_checkout(&buyer, &req.listing_ids)
        .await?;
    Ok(Json(handle))
}

/// POST /api/v1/payments/webhook
///
/// Signed by the payment provider; the raw body is verified before it
/// is parsed.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let ack = build_checkout_service(&state)
        .handle_webhook(&body, signature)
        .await?;
    Ok(Json(ack))
}
