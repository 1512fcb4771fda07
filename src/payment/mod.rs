//! Payment provider integration
//!
//! Handles:
//! - Checkout session creation at the provider
//! - Webhook signature verification
//! - Webhook event decoding

mod gateway;
mod signature;
mod webhook;

pub use gateway::{CheckoutHandle, PaymentGateway};
pub use signature::{SIGNATURE_HEADER, sign_webhook_payload, verify_webhook_signature};
pub use webhook::{PaymentOutcome, WebhookEvent};
