//! Session token authentication
//!
//! Handles:
//! - Signed session tokens from the external identity issuer
//! - Identity resolution for handlers
//! - Authentication and admin middleware

mod middleware;
pub mod session;

pub use middleware::{AdminUser, CurrentUser, MaybeUser, require_admin, require_auth};
pub use session::{Identity, Session, create_session_token, verify_session_token};
