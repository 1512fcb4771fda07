//! Session management
//!
//! Uses HMAC-signed bearer tokens minted by the identity issuer.
//! No server-side session storage needed.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::data::Role;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// User session data
///
/// Carried in the bearer token (or `session` cookie). The issuer is
/// trusted as-is once the signature checks out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable actor identifier, e.g. an email address
    pub identity: String,
    /// Name shown on reviews
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    pub fn identity(&self) -> Identity {
        Identity {
            id: self.identity.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
        }
    }
}

/// The acting caller, resolved once per request and passed explicitly
/// into every service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn new_mac(secret: &str) -> Result<HmacSha256, AppError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid HMAC key: {e}")))
}

/// Create a signed session token
///
/// Token format: base64(payload).base64(hmac_sha256(payload))
///
/// # Arguments
/// * `session` - Session data to encode
/// * `secret` - HMAC secret key
///
/// # Returns
/// Signed token string
pub fn create_session_token(session: &Session, secret: &str) -> Result<String, AppError> {
    let payload = serde_json::to_string(session).map_err(|e| AppError::Internal(e.into()))?;
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes());

    let mut mac = new_mac(secret)?;
    mac.update(payload_b64.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a session token
///
/// # Errors
/// `InvalidSignature` if the signature does not match, `Unauthorized` if
/// the token is malformed, expired, or spans more than `max_age_seconds`
pub fn verify_session_token(
    token: &str,
    secret: &str,
    max_age_seconds: i64,
) -> Result<Session, AppError> {
    let (payload_b64, signature_b64) = token.split_once('.').ok_or(AppError::Unauthorized)?;
    if signature_b64.contains('.') {
        return Err(AppError::Unauthorized);
    }

    let mut mac = new_mac(secret)?;
    mac.update(payload_b64.as_bytes());

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;

    mac.verify_slice(&signature)
        .map_err(|_| AppError::InvalidSignature)?;

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| AppError::Unauthorized)?;

    let session: Session =
        serde_json::from_slice(&payload_bytes).map_err(|_| AppError::Unauthorized)?;

    if session.is_expired() {
        return Err(AppError::Unauthorized);
    }

    // The issuer may not mint sessions longer than the configured lifetime
    let lifetime = session.expires_at - session.created_at;
    if chrono::Duration::try_seconds(max_age_seconds).is_some_and(|max| lifetime > max) {
        tracing::debug!(identity = %session.identity, "Session lifetime exceeds max age");
        return Err(AppError::Unauthorized);
    }

    if session.identity.trim().is_empty() {
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";
    const MAX_AGE: i64 = 604800;

    fn session(role: Role, ttl: Duration) -> Session {
        let now = Utc::now();
        Session {
            identity: "buyer@example.com".to_string(),
            display_name: "Buyer".to_string(),
            role,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn token_round_trips() {
        let token = create_session_token(&session(Role::Admin, Duration::hours(1)), SECRET).unwrap();
        let decoded = verify_session_token(&token, SECRET, MAX_AGE).unwrap();

        assert_eq!(decoded.identity, "buyer@example.com");
        assert!(decoded.identity().is_admin());
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = create_session_token(&session(Role::User, Duration::hours(1)), SECRET).unwrap();
        let error =
            verify_session_token(&token, "another-secret-key-at-least-32-bytes", MAX_AGE)
                .unwrap_err();
        assert!(matches!(error, AppError::InvalidSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token =
            create_session_token(&session(Role::User, Duration::seconds(-5)), SECRET).unwrap();
        assert!(matches!(
            verify_session_token(&token, SECRET, MAX_AGE),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn session_longer_than_max_age_is_rejected() {
        let token =
            create_session_token(&session(Role::User, Duration::days(30)), SECRET).unwrap();
        assert!(matches!(
            verify_session_token(&token, SECRET, MAX_AGE),
            Err(AppError::Unauthorized)
        ));

        let token = create_session_token(&session(Role::User, Duration::days(7)), SECRET).unwrap();
        assert!(verify_session_token(&token, SECRET, MAX_AGE).is_ok());
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert!(matches!(
            verify_session_token("not-a-token", SECRET, MAX_AGE),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_session_token("a.b.c", SECRET, MAX_AGE),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn role_defaults_to_user() {
        let json = r#"{"identity":"u","display_name":"U","created_at":"2025-01-01T00:00:00Z","expires_at":"2999-01-01T00:00:00Z"}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.role, Role::User);
    }
}
