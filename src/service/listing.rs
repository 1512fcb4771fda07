//! Listing service
//!
//! Owns the listing lifecycle: `pending` on submission, then exactly one
//! move to `approved` or `rejected`. Terminal states are never left.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::auth::Identity;
use crate::config::CatalogConfig;
use crate::data::{Category, Database, EntityId, Listing, ListingStatus};
use crate::error::{AppError, FieldErrors};
use crate::metrics::observe_transition;

const MIN_TITLE_CHARS: usize = 3;
const MIN_DESCRIPTION_CHARS: usize = 10;

/// Seller submission as received from the client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub endpoint_url: String,
}

/// Draft that passed validation, normalized for storage
#[derive(Debug, Clone, PartialEq)]
struct ValidDraft {
    title: String,
    description: String,
    price: i64,
    category: Category,
    tags: Vec<String>,
    endpoint_url: String,
}

fn is_http_url(value: &str) -> bool {
    match url::Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Trim, drop empties and case-insensitive repeats, keep at most `max`.
pub fn normalize_tags(tags: &[String], max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .take(max)
        .map(str::to_string)
        .collect()
}

/// Check every field and report all failures at once
fn validate_draft(draft: &ListingDraft, rules: &CatalogConfig) -> Result<ValidDraft, AppError> {
    let mut errors = FieldErrors::new();

    let title = draft.title.trim();
    if title.chars().count() < MIN_TITLE_CHARS {
        errors.insert(
            "title".to_string(),
            format!("title must be at least {MIN_TITLE_CHARS} characters"),
        );
    }

    let description = draft.description.trim();
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        errors.insert(
            "description".to_string(),
            format!("description must be at least {MIN_DESCRIPTION_CHARS} characters"),
        );
    }

    if draft.price < rules.min_price {
        errors.insert(
            "price".to_string(),
            format!("price must be at least {}", rules.min_price),
        );
    } else if draft.price > rules.max_price {
        errors.insert(
            "price".to_string(),
            format!("price must be at most {}", rules.max_price),
        );
    }

    let category = draft.category.parse::<Category>();
    if category.is_err() {
        errors.insert(
            "category".to_string(),
            "category must be one of the listed categories".to_string(),
        );
    }

    let endpoint_url = draft.endpoint_url.trim();
    if !is_http_url(endpoint_url) {
        errors.insert(
            "endpoint_url".to_string(),
            "endpoint_url must be an http or https URL".to_string(),
        );
    }

    match category {
        Ok(category) if errors.is_empty() => Ok(ValidDraft {
            title: title.to_string(),
            description: description.to_string(),
            price: draft.price,
            category,
            tags: normalize_tags(&draft.tags, rules.max_tags),
            endpoint_url: endpoint_url.to_string(),
        }),
        _ => Err(AppError::InvalidFields(errors)),
    }
}

/// Listing service
pub struct ListingService {
    db: Arc<Database>,
    rules: CatalogConfig,
}

impl ListingService {
    /// Create new listing service
    pub fn new(db: Arc<Database>, rules: CatalogConfig) -> Self {
        Self { db, rules }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Submit a new listing in `pending`
    ///
    /// # Errors
    /// `InvalidFields` naming every failing field; nothing is written then
    pub async fn submit(&self, seller: &Identity, draft: ListingDraft) -> Result<Listing, AppError> {
        let valid = validate_draft(&draft, &self.rules)?;

        let listing = Listing {
            id: EntityId::new().0,
            title: valid.title,
            description: valid.description,
            price: valid.price,
            category: valid.category,
            tags: valid.tags,
            endpoint_url: valid.endpoint_url,
            creator_identity: seller.id.clone(),
            created_at: Utc::now(),
            status: ListingStatus::Pending,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
        };

        self.db.insert_listing(&listing).await?;
        observe_transition("submit");
        tracing::info!(listing_id = %listing.id, seller = %seller.id, "Listing submitted");

        Ok(listing)
    }

    /// Approve a pending listing
    ///
    /// # Errors
    /// `Forbidden` for non-admins, `NotFound` for unknown ids, `Conflict`
    /// when the listing already reached a terminal state
    pub async fn approve(&self, admin: &Identity, id: &str) -> Result<Listing, AppError> {
        require_admin(admin)?;

        if !self.db.approve_pending_listing(id, Utc::now()).await? {
            return Err(self.transition_failure(id, ListingStatus::Approved).await);
        }

        observe_transition("approve");
        tracing::info!(listing_id = %id, admin = %admin.id, "Listing approved");
        self.load(id).await
    }

    /// Reject a pending listing with a mandatory reason
    pub async fn reject(
        &self,
        admin: &Identity,
        id: &str,
        reason: &str,
    ) -> Result<Listing, AppError> {
        require_admin(admin)?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::field("reason", "a rejection reason is required"));
        }

        if !self.db.reject_pending_listing(id, Utc::now(), reason).await? {
            return Err(self.transition_failure(id, ListingStatus::Rejected).await);
        }

        observe_transition("reject");
        tracing::info!(listing_id = %id, admin = %admin.id, reason, "Listing rejected");
        self.load(id).await
    }

    /// Seller withdraws their own pending listing
    ///
    /// Purchases and reviews that reference it are left in place.
    pub async fn delete(&self, seller: &Identity, id: &str) -> Result<(), AppError> {
        let listing = self.load(id).await?;

        if listing.creator_identity != seller.id {
            return Err(AppError::Forbidden);
        }
        if listing.status != ListingStatus::Pending {
            return Err(AppError::Conflict(format!(
                "listing {id} is {} and can no longer be withdrawn",
                listing.status.as_str()
            )));
        }

        // Lost a race with a moderator
        if !self.db.delete_pending_listing(id).await? {
            return Err(self.transition_failure(id, ListingStatus::Pending).await);
        }

        observe_transition("delete");
        tracing::info!(listing_id = %id, seller = %seller.id, "Listing withdrawn");
        Ok(())
    }

    /// Admin removal regardless of status, without cascading
    pub async fn remove(&self, admin: &Identity, id: &str) -> Result<(), AppError> {
        require_admin(admin)?;

        if !self.db.delete_listing(id).await? {
            return Err(AppError::not_found("listing", id));
        }

        observe_transition("remove");
        tracing::warn!(listing_id = %id, admin = %admin.id, "Listing removed by admin");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The caller's own listings, any status
    pub async fn mine(&self, seller: &Identity) -> Result<Vec<Listing>, AppError> {
        self.db.get_listings_by_creator(&seller.id).await
    }

    /// Moderation queue, oldest first
    pub async fn queue(
        &self,
        admin: &Identity,
        status: Option<ListingStatus>,
    ) -> Result<Vec<Listing>, AppError> {
        require_admin(admin)?;
        self.db.get_listings_by_status(status).await
    }

    async fn load(&self, id: &str) -> Result<Listing, AppError> {
        self.db
            .get_listing(id)
            .await?
            .ok_or_else(|| AppError::not_found("listing", id))
    }

    /// Explain why a conditional update touched no row
    async fn transition_failure(&self, id: &str, target: ListingStatus) -> AppError {
        match self.db.get_listing(id).await {
            Ok(None) => AppError::not_found("listing", id),
            // Update lost a race with another writer
            Ok(Some(current)) if current.status.can_transition_to(target) => AppError::Conflict(
                format!("listing {id} changed during moderation; retry"),
            ),
            Ok(Some(current)) => {
                tracing::warn!(
                    listing_id = %id,
                    current = current.status.as_str(),
                    target = target.as_str(),
                    "Listing transition refused"
                );
                AppError::Conflict(format!(
                    "listing {id} is already {}",
                    current.status.as_str()
                ))
            }
            Err(error) => error,
        }
    }
}

fn require_admin(identity: &Identity) -> Result<(), AppError> {
    if identity.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}
