//! Eligibility service
//!
//! Gates purchases and reviews. The predicates are pure functions over
//! snapshots of the caller's purchases and reviews; the service loads
//! those snapshots and performs the guarded writes.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::auth::Identity;
use crate::data::{
    CheckoutCompletion, CheckoutSession, Database, EntityId, Purchase, PurchaseItem, Review,
    items_total,
};
use crate::error::AppError;
use crate::metrics::{PURCHASE_REVENUE_TOTAL, PURCHASES_TOTAL, REVIEWS_TOTAL};

/// Whether `identity` owns a purchase containing `listing_id`
pub fn has_purchased(purchases: &[Purchase], identity: &str, listing_id: &str) -> bool {
    purchases
        .iter()
        .any(|p| p.purchaser_identity == identity && p.contains_listing(listing_id))
}

/// Whether `identity` already reviewed `listing_id`
pub fn has_reviewed(reviews: &[Review], identity: &str, listing_id: &str) -> bool {
    reviews
        .iter()
        .any(|r| r.author_identity == identity && r.listing_id == listing_id)
}

/// Anonymous callers never may; nobody buys the same listing twice.
pub fn can_purchase(identity: Option<&Identity>, purchases: &[Purchase], listing_id: &str) -> bool {
    match identity {
        Some(identity) => !has_purchased(purchases, &identity.id, listing_id),
        None => false,
    }
}

/// Reviewing needs a prior purchase and no earlier review by the same caller.
pub fn can_review(
    identity: Option<&Identity>,
    purchases: &[Purchase],
    reviews: &[Review],
    listing_id: &str,
) -> bool {
    match identity {
        Some(identity) => {
            has_purchased(purchases, &identity.id, listing_id)
                && !has_reviewed(reviews, &identity.id, listing_id)
        }
        None => false,
    }
}

/// Both answers for one listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Eligibility {
    pub can_purchase: bool,
    pub can_review: bool,
}

/// Build a purchase record from item snapshots taken by the caller
pub(crate) fn build_purchase(
    purchaser: &str,
    items: Vec<PurchaseItem>,
) -> Result<Purchase, AppError> {
    if items.is_empty() {
        return Err(AppError::field("items", "a purchase needs at least one item"));
    }
    if items.iter().any(|item| item.price < 0) {
        return Err(AppError::field("items", "item prices must not be negative"));
    }

    Ok(Purchase {
        id: EntityId::new().0,
        purchaser_identity: purchaser.to_string(),
        total: items_total(&items)?,
        items,
        purchased_at: Utc::now(),
    })
}

/// What happened to a paid checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutRecord {
    Recorded(Purchase),
    /// Repeated notification for a closed session
    AlreadyClosed,
    /// Buyer owned an item already; session failed
    AlreadyOwned,
}

fn record_purchase_metrics(purchase: &Purchase) {
    PURCHASES_TOTAL.inc();
    PURCHASE_REVENUE_TOTAL.inc_by(purchase.total as f64);
    tracing::info!(
        purchase_id = %purchase.id,
        purchaser = %purchase.purchaser_identity,
        items = purchase.items.len(),
        total = purchase.total,
        "Purchase recorded"
    );
}

/// Eligibility service
pub struct EligibilityService {
    db: Arc<Database>,
}

impl EligibilityService {
    /// Create new eligibility service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn snapshots(&self, identity: &Identity) -> Result<(Vec<Purchase>, Vec<Review>), AppError> {
        let purchases = self.db.get_purchases_by_identity(&identity.id).await?;
        let reviews = self.db.get_reviews_by_author(&identity.id).await?;
        Ok((purchases, reviews))
    }

    // =========================================================================
    // Checks
    // =========================================================================

    pub async fn can_purchase(
        &self,
        identity: Option<&Identity>,
        listing_id: &str,
    ) -> Result<bool, AppError> {
        let Some(identity) = identity else {
            return Ok(false);
        };
        let purchases = self.db.get_purchases_by_identity(&identity.id).await?;
        Ok(can_purchase(Some(identity), &purchases, listing_id))
    }

    pub async fn can_review(
        &self,
        identity: Option<&Identity>,
        listing_id: &str,
    ) -> Result<bool, AppError> {
        Ok(self.eligibility(identity, listing_id).await?.can_review)
    }

    /// Purchase and review eligibility in one pass
    pub async fn eligibility(
        &self,
        identity: Option<&Identity>,
        listing_id: &str,
    ) -> Result<Eligibility, AppError> {
        let Some(identity) = identity else {
            return Ok(Eligibility {
                can_purchase: false,
                can_review: false,
            });
        };

        let (purchases, reviews) = self.snapshots(identity).await?;
        Ok(Eligibility {
            can_purchase: can_purchase(Some(identity), &purchases, listing_id),
            can_review: can_review(Some(identity), &purchases, &reviews, listing_id),
        })
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Record a purchase of the given item snapshots
    ///
    /// `total` is computed here from the item prices.
    pub async fn record_purchase(
        &self,
        purchaser: &Identity,
        items: Vec<PurchaseItem>,
    ) -> Result<Purchase, AppError> {
        let purchase = build_purchase(&purchaser.id, items)?;
        self.db.insert_purchase(&purchase).await?;
        record_purchase_metrics(&purchase);
        Ok(purchase)
    }

    /// Record the purchase for a paid checkout session
    ///
    /// A session is closed once. If the purchaser came to own one of its
    /// listings through another session, the session fails instead.
    pub async fn record_checkout_purchase(
        &self,
        session: &CheckoutSession,
    ) -> Result<CheckoutRecord, AppError> {
        let purchase = build_purchase(&session.purchaser_identity, session.items.clone())?;

        match self
            .db
            .complete_checkout_with_purchase(&session.id, &purchase)
            .await?
        {
            CheckoutCompletion::Recorded => {
                record_purchase_metrics(&purchase);
                Ok(CheckoutRecord::Recorded(purchase))
            }
            CheckoutCompletion::AlreadyClosed => Ok(CheckoutRecord::AlreadyClosed),
            CheckoutCompletion::AlreadyOwned => {
                tracing::warn!(
                    session_id = %session.id,
                    purchaser = %session.purchaser_identity,
                    "Paid session refused: listing already owned"
                );
                Ok(CheckoutRecord::AlreadyOwned)
            }
        }
    }

    /// Purchase history, newest first
    ///
    /// Items are returned as captured, including ones whose listing has
    /// since been removed.
    pub async fn purchases(&self, identity: &Identity) -> Result<Vec<Purchase>, AppError> {
        self.db.get_purchases_by_identity(&identity.id).await
    }

    // =========================================================================
    // Reviews
    // =========================================================================

    /// Record a verified review
    ///
    /// # Errors
    /// `InvalidFields` on `rating` (outside 1..=5), `comment` (blank) or
    /// `listing_id` (no purchase, or already reviewed)
    pub async fn record_review(
        &self,
        author: &Identity,
        listing_id: &str,
        rating: i64,
        comment: &str,
    ) -> Result<Review, AppError> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::field("rating", "rating must be between 1 and 5"));
        }

        let comment = comment.trim();
        if comment.is_empty() {
            return Err(AppError::field("comment", "comment must not be empty"));
        }

        let (purchases, reviews) = self.snapshots(author).await?;
        if !has_purchased(&purchases, &author.id, listing_id) {
            return Err(AppError::field(
                "listing_id",
                "only purchasers can review this listing",
            ));
        }
        if has_reviewed(&reviews, &author.id, listing_id) {
            return Err(AppError::field(
                "listing_id",
                "you have already reviewed this listing",
            ));
        }

        let review = Review {
            id: EntityId::new().0,
            listing_id: listing_id.to_string(),
            author_identity: author.id.clone(),
            author_display_name: author.display_name.clone(),
            rating,
            comment: comment.to_string(),
            created_at: Utc::now(),
            verified_purchase: true,
            helpful_count: 0,
        };

        self.db.insert_review(&review).await?;
        REVIEWS_TOTAL.inc();
        tracing::info!(review_id = %review.id, listing_id, author = %author.id, rating, "Review recorded");

        Ok(review)
    }

    /// Reviews of a listing, newest first
    pub async fn reviews_for(&self, listing_id: &str) -> Result<Vec<Review>, AppError> {
        self.db.get_reviews_for_listing(listing_id).await
    }

    /// Best-effort helpful vote; unknown ids are ignored
    pub async fn mark_helpful(&self, review_id: &str) -> Result<(), AppError> {
        if !self.db.increment_review_helpful(review_id).await? {
            tracing::debug!(review_id, "Helpful vote for unknown review ignored");
        }
        Ok(())
    }

    /// Admin removal of a review
    pub async fn delete_review(&self, admin: &Identity, review_id: &str) -> Result<(), AppError> {
        if !admin.is_admin() {
            return Err(AppError::Forbidden);
        }
        if !self.db.delete_review(review_id).await? {
            return Err(AppError::not_found("review", review_id));
        }

        tracing::warn!(review_id, admin = %admin.id, "Review deleted by admin");
        Ok(())
    }
}
