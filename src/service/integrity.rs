//! Integrity service
//!
//! Detects duplicate listing ids and purchase items that point at
//! listings which no longer exist, and prunes the latter on request.
//! Duplicate listings are reported only; resolving them is manual.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::auth::Identity;
use crate::data::{Database, Purchase};
use crate::error::AppError;
use crate::metrics::{INTEGRITY_AUDITS_TOTAL, INTEGRITY_REPAIRS_TOTAL};

/// Outcome of an audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub healthy: bool,
    /// Every id seen at least twice, once each, in first-seen order
    pub duplicate_ids: Vec<String>,
    pub invalid_purchase_item_count: usize,
    pub total_listings: usize,
}

/// What a repair changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub removed_items: usize,
    pub removed_purchases: usize,
    pub remaining_purchases: usize,
}

/// Audit a listing id snapshot against a purchase snapshot
pub fn audit<S: AsRef<str>>(listing_ids: &[S], purchases: &[Purchase]) -> IntegrityReport {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut duplicate_ids = Vec::new();

    for id in listing_ids {
        let id = id.as_ref();
        let count = occurrences.entry(id).or_insert(0);
        *count += 1;
        if *count == 2 {
            duplicate_ids.push(id.to_string());
        }
    }

    let invalid_purchase_item_count = purchases
        .iter()
        .flat_map(|purchase| purchase.items.iter())
        .filter(|item| !occurrences.contains_key(item.listing_id.as_str()))
        .count();

    IntegrityReport {
        healthy: duplicate_ids.is_empty() && invalid_purchase_item_count == 0,
        duplicate_ids,
        invalid_purchase_item_count,
        total_listings: listing_ids.len(),
    }
}

/// Drop dangling items, then purchases left without items
///
/// Totals are kept as charged. Applying this twice gives the same result
/// as applying it once.
pub fn repair<S: AsRef<str>>(listing_ids: &[S], purchases: &[Purchase]) -> Vec<Purchase> {
    let valid: HashSet<&str> = listing_ids.iter().map(AsRef::as_ref).collect();

    purchases
        .iter()
        .filter_map(|purchase| {
            let items: Vec<_> = purchase
                .items
                .iter()
                .filter(|item| valid.contains(item.listing_id.as_str()))
                .cloned()
                .collect();

            if items.is_empty() {
                None
            } else {
                Some(Purchase {
                    items,
                    ..purchase.clone()
                })
            }
        })
        .collect()
}

/// Integrity service
pub struct IntegrityService {
    db: Arc<Database>,
}

impl IntegrityService {
    /// Create new integrity service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Audit the current store contents
    pub async fn audit(&self) -> Result<IntegrityReport, AppError> {
        let listing_ids = self.db.get_all_listing_ids().await?;
        let purchases = self.db.get_all_purchases().await?;
        let report = audit(&listing_ids, &purchases);

        if report.healthy {
            INTEGRITY_AUDITS_TOTAL.with_label_values(&["healthy"]).inc();
            tracing::info!(total_listings = report.total_listings, "Integrity audit passed");
        } else {
            INTEGRITY_AUDITS_TOTAL.with_label_values(&["unhealthy"]).inc();
            tracing::warn!(
                duplicate_ids = ?report.duplicate_ids,
                invalid_purchase_items = report.invalid_purchase_item_count,
                "Integrity audit found faults"
            );
        }

        Ok(report)
    }

    /// Prune dangling purchase items and persist the result
    ///
    /// Destructive: the purchase collection is rewritten. `confirmed` must
    /// be true.
    pub async fn repair(&self, admin: &Identity, confirmed: bool) -> Result<RepairSummary, AppError> {
        if !admin.is_admin() {
            return Err(AppError::Forbidden);
        }
        if !confirmed {
            return Err(AppError::Validation(
                "repair rewrites purchase history; resend with confirm=true".to_string(),
            ));
        }

        let listing_ids = self.db.get_all_listing_ids().await?;
        let purchases = self.db.get_all_purchases().await?;
        let repaired = repair(&listing_ids, &purchases);

        let items_before: usize = purchases.iter().map(|p| p.items.len()).sum();
        let items_after: usize = repaired.iter().map(|p| p.items.len()).sum();
        let summary = RepairSummary {
            removed_items: items_before - items_after,
            removed_purchases: purchases.len() - repaired.len(),
            remaining_purchases: repaired.len(),
        };

        if summary.removed_items > 0 {
            self.db.replace_purchases(&repaired).await?;
        }

        INTEGRITY_REPAIRS_TOTAL.inc();
        tracing::warn!(
            admin = %admin.id,
            removed_items = summary.removed_items,
            removed_purchases = summary.removed_purchases,
            "Purchase history repaired"
        );

        Ok(summary)
    }
}
