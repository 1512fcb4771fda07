//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database and payment provider operations.

mod catalog;
mod checkout;
mod eligibility;
mod integrity;
mod listing;
mod user;

pub use catalog::{
    CatalogFilter, CatalogPage, CatalogParams, CatalogService, PriceRange, SortKey,
    filter_listings,
};
pub use checkout::{CheckoutService, WebhookAck};
pub use eligibility::{
    CheckoutRecord, Eligibility, EligibilityService, can_purchase, can_review, has_purchased, has_reviewed,
};
pub use integrity::{IntegrityReport, IntegrityService, RepairSummary, audit, repair};
pub use listing::{ListingDraft, ListingService, normalize_tags};
pub use user::{MarketplaceStats, UserService};
