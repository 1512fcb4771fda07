//! Webhook event decoding

use serde::Deserialize;

use crate::error::AppError;

/// Provider notification envelope
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: CheckoutSessionObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    /// Provider session id
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
}

/// What a webhook event means for the matching checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money collected; record the purchase
    Paid { session_id: String },
    /// Session will never be paid
    Failed { session_id: String },
    /// Nothing to do for this event
    Ignored { event_type: String },
}

impl WebhookEvent {
    /// Decode a raw webhook body
    pub fn parse(payload: &[u8]) -> Result<Self, AppError> {
        serde_json::from_slice(payload)
            .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))
    }

    pub fn session_id(&self) -> &str {
        &self.data.object.id
    }

    pub fn outcome(&self) -> PaymentOutcome {
        let session_id = self.session_id().to_string();
        let paid = self.data.object.payment_status.as_deref() == Some("paid");

        match self.event_type.as_str() {
            "checkout.session.completed" if paid => PaymentOutcome::Paid { session_id },
            "checkout.session.async_payment_succeeded" => PaymentOutcome::Paid { session_id },
            "checkout.session.expired" | "checkout.session.async_payment_failed" => {
                PaymentOutcome::Failed { session_id }
            }
            other => PaymentOutcome::Ignored {
                event_type: other.to_string(),
            },
        }
    }
}
