//! Authentication middleware
//!
//! Protects routes that require authentication or the admin role.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use super::session::{Identity, Session, verify_session_token};
use crate::AppState;
use crate::error::AppError;

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
        .or_else(|| {
            let jar = CookieJar::from_headers(headers);
            jar.get("session").map(|cookie| cookie.value().to_owned())
        })
}

fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<Session, AppError> {
    let token = extract_token_from_headers(headers).ok_or(AppError::Unauthorized)?;
    verify_session_token(
        &token,
        &state.config.auth.session_secret,
        state.config.auth.session_max_age,
    )
}

fn session_from_parts(parts: &mut Parts, state: &AppState) -> Result<Session, AppError> {
    if let Some(session) = parts.extensions.get::<Session>().cloned() {
        return Ok(session);
    }

    let session = authenticate(&parts.headers, state)?;
    parts.extensions.insert(session.clone());
    Ok(session)
}

/// Middleware to require authentication
///
/// Extracts and verifies session from cookie or Authorization header.
/// Adds Session to request extensions if valid.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/api/v1/...", ...)
///     .layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let session = authenticate(request.headers(), &state)?;
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Middleware to require the admin role
///
/// Unauthenticated callers get 401, authenticated non-admins 403.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let session = authenticate(request.headers(), &state)?;
    if !session.identity().is_admin() {
        tracing::warn!(identity = %session.identity, "Non-admin caller denied");
        return Err(AppError::Forbidden);
    }
    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}

/// Extractor for current authenticated user
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(identity): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", identity.display_name)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let session = session_from_parts(parts, &state)?;

        Ok(CurrentUser(session.identity()))
    }
}

/// Extractor for an authenticated admin
#[derive(Debug, Clone)]
pub struct AdminUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let identity = session_from_parts(parts, &state)?.identity();
        if !identity.is_admin() {
            return Err(AppError::Forbidden);
        }

        Ok(AdminUser(identity))
    }
}

/// Optional current user extractor
///
/// Returns None if not authenticated, instead of error.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let identity = session_from_parts(parts, &state)
            .ok()
            .map(|session| session.identity());

        Ok(MaybeUser(identity))
    }
}
