//! Checkout service
//!
//! Opens payment sessions for approved listings and turns verified
//! provider notifications into purchases. A session is closed exactly
//! once, so repeated deliveries never record twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::eligibility::{CheckoutRecord, EligibilityService, can_purchase};
use crate::auth::Identity;
use crate::config::PaymentConfig;
use crate::data::{
    CheckoutSession, CheckoutStatus, Database, ListingStatus, PurchaseItem, items_total,
};
use crate::error::AppError;
use crate::metrics::PAYMENT_WEBHOOKS_TOTAL;
use crate::payment::{
    CheckoutHandle, PaymentGateway, PaymentOutcome, WebhookEvent, verify_webhook_signature,
};

/// Response to the provider after a webhook was handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    /// `recorded`, `failed`, `already_owned`, `duplicate` or `ignored`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
}

impl WebhookAck {
    fn new(outcome: &'static str) -> Self {
        Self {
            received: true,
            outcome,
            purchase_id: None,
        }
    }
}

/// Checkout service
pub struct CheckoutService {
    db: Arc<Database>,
    gateway: Arc<PaymentGateway>,
    config: PaymentConfig,
}

impl CheckoutService {
    /// Create new checkout service
    pub fn new(db: Arc<Database>, gateway: Arc<PaymentGateway>, config: PaymentConfig) -> Self {
        Self {
            db,
            gateway,
            config,
        }
    }

    /// Open a provider checkout session for the given listings
    ///
    /// Item snapshots are taken now; later listing edits or deletions do
    /// not change what the buyer is charged for.
    ///
    /// # Errors
    /// - `InvalidFields` on `listing_ids` for an empty or repeated list, a
    ///   listing the caller already owns, or one already in an open checkout
    /// - `NotFound` when a listing is missing or not approved
    /// - `Upstream` when the provider call fails
    pub async fn start_checkout(
        &self,
        buyer: &Identity,
        listing_ids: &[String],
    ) -> Result<CheckoutHandle, AppError> {
        if listing_ids.is_empty() {
            return Err(AppError::field("listing_ids", "select at least one listing"));
        }
        let mut seen = HashSet::new();
        if let Some(repeated) = listing_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(AppError::field(
                "listing_ids",
                format!("listing {repeated} appears more than once"),
            ));
        }

        let listings = self.db.get_listings_by_ids(listing_ids).await?;
        let purchases = self.db.get_purchases_by_identity(&buyer.id).await?;
        let open_sessions = self
            .db
            .get_open_checkout_sessions_by_identity(&buyer.id)
            .await?;

        let mut items = Vec::with_capacity(listing_ids.len());
        for id in listing_ids {
            let listing = listings
                .iter()
                .find(|listing| &listing.id == id && listing.status == ListingStatus::Approved)
                .ok_or_else(|| AppError::not_found("listing", id.as_str()))?;

            if !can_purchase(Some(buyer), &purchases, id) {
                return Err(AppError::field(
                    "listing_ids",
                    format!("listing {id} is already purchased"),
                ));
            }

            if open_sessions.iter().any(|session| session.contains_listing(id)) {
                return Err(AppError::field(
                    "listing_ids",
                    format!("listing {id} already has a checkout in progress"),
                ));
            }

            items.push(PurchaseItem::snapshot(listing));
        }
        let total = items_total(&items)?;

        let handle = self
            .gateway
            .create_checkout_session(
                &items,
                &self.config.success_url,
                &self.config.cancel_url,
                &buyer.id,
            )
            .await?;

        let session = CheckoutSession {
            id: handle.session_id.clone(),
            purchaser_identity: buyer.id.clone(),
            total,
            items,
            status: CheckoutStatus::Open,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.db.insert_checkout_session(&session).await?;

        tracing::info!(
            session_id = %session.id,
            buyer = %buyer.id,
            total = session.total,
            "Checkout started"
        );

        Ok(handle)
    }

    /// Verify and apply a provider notification
    ///
    /// # Errors
    /// `InvalidSignature` when the signature header is missing or wrong,
    /// `NotFound` for a session this server never opened
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, AppError> {
        let verified = signature.ok_or(AppError::InvalidSignature).and_then(|header| {
            verify_webhook_signature(
                payload,
                header,
                &self.config.webhook_secret,
                self.config.webhook_tolerance_seconds,
                Utc::now(),
            )
        });
        if let Err(error) = verified {
            PAYMENT_WEBHOOKS_TOTAL.with_label_values(&["rejected"]).inc();
            tracing::warn!("Webhook signature verification failed");
            return Err(error);
        }

        let event = WebhookEvent::parse(payload)?;
        let ack = match event.outcome() {
            PaymentOutcome::Paid { session_id } => self.complete(&session_id).await?,
            PaymentOutcome::Failed { session_id } => self.fail(&session_id).await?,
            PaymentOutcome::Ignored { event_type } => {
                tracing::debug!(%event_type, "Webhook event ignored");
                WebhookAck::new("ignored")
            }
        };

        PAYMENT_WEBHOOKS_TOTAL
            .with_label_values(&[ack.outcome])
            .inc();
        tracing::info!(
            event_id = event.id.as_deref().unwrap_or_default(),
            event_type = %event.event_type,
            session_id = %event.session_id(),
            outcome = ack.outcome,
            "Webhook handled"
        );

        Ok(ack)
    }

    async fn load_session(&self, session_id: &str) -> Result<CheckoutSession, AppError> {
        self.db
            .get_checkout_session(session_id)
            .await?
            .ok_or_else(|| AppError::not_found("checkout session", session_id))
    }

    async fn complete(&self, session_id: &str) -> Result<WebhookAck, AppError> {
        let session = self.load_session(session_id).await?;
        if session.status != CheckoutStatus::Open {
            return Ok(WebhookAck::new("duplicate"));
        }

        let eligibility = EligibilityService::new(self.db.clone());
        match eligibility.record_checkout_purchase(&session).await? {
            CheckoutRecord::Recorded(purchase) => Ok(WebhookAck {
                purchase_id: Some(purchase.id),
                ..WebhookAck::new("recorded")
            }),
            CheckoutRecord::AlreadyClosed => Ok(WebhookAck::new("duplicate")),
            CheckoutRecord::AlreadyOwned => Ok(WebhookAck::new("already_owned")),
        }
    }

    async fn fail(&self, session_id: &str) -> Result<WebhookAck, AppError> {
        // Surface unknown sessions as NotFound
        self.load_session(session_id).await?;

        if self.db.fail_checkout_session(session_id, Utc::now()).await? {
            Ok(WebhookAck::new("failed"))
        } else {
            Ok(WebhookAck::new("duplicate"))
        }
    }
}
