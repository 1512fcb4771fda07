//! Checkout session client
//!
//! Talks to a Stripe-style `/v1/checkout/sessions` endpoint.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::PaymentConfig;
use crate::data::PurchaseItem;
use crate::error::AppError;

/// Provider session id plus the URL the buyer is sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutHandle {
    pub session_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: String,
}

/// Payment provider client
#[derive(Clone)]
pub struct PaymentGateway {
    http_client: Arc<reqwest::Client>,
    api_base: String,
    secret_key: String,
    currency: String,
}

impl PaymentGateway {
    pub fn new(http_client: Arc<reqwest::Client>, config: &PaymentConfig) -> Self {
        Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            currency: config.currency.to_ascii_lowercase(),
        }
    }

    fn checkout_form(
        &self,
        items: &[PurchaseItem],
        success_url: &str,
        cancel_url: &str,
        customer_email: &str,
    ) -> Result<Vec<(String, String)>, AppError> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), success_url.to_string()),
            ("cancel_url".to_string(), cancel_url.to_string()),
            ("customer_email".to_string(), customer_email.to_string()),
        ];

        for (index, item) in items.iter().enumerate() {
            let prefix = format!("line_items[{index}]");
            form.push((
                format!("{prefix}[price_data][currency]"),
                self.currency.clone(),
            ));
            form.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.title.clone(),
            ));
            // Provider amounts are in minor units
            let unit_amount = item.price.checked_mul(100).ok_or_else(|| {
                AppError::field(
                    "price",
                    format!("price of listing {} is too large to charge", item.listing_id),
                )
            })?;
            form.push((
                format!("{prefix}[price_data][unit_amount]"),
                unit_amount.to_string(),
            ));
            form.push((format!("{prefix}[quantity]"), "1".to_string()));
        }

        let listing_ids = items
            .iter()
            .map(|item| item.listing_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        form.push(("metadata[listing_ids]".to_string(), listing_ids));

        Ok(form)
    }

    /// Open a checkout session for the given item snapshots
    ///
    /// # Errors
    /// `Upstream` on transport failure or a non-success response
    pub async fn create_checkout_session(
        &self,
        items: &[PurchaseItem],
        success_url: &str,
        cancel_url: &str,
        customer_email: &str,
    ) -> Result<CheckoutHandle, AppError> {
        let endpoint = format!("{}/v1/checkout/sessions", self.api_base);
        let form = self.checkout_form(items, success_url, cancel_url, customer_email)?;

        let response = self
            .http_client
            .post(&endpoint)
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                AppError::Upstream(format!("Failed to reach payment provider: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Payment provider rejected checkout: HTTP {}",
                response.status()
            )));
        }

        let session: SessionResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Invalid payment provider response: {}", e))
        })?;

        tracing::debug!(session_id = %session.id, items = items.len(), "Checkout session created");

        Ok(CheckoutHandle {
            session_id: session.id,
            redirect_url: session.url,
        })
    }
}
