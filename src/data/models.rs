//! Data models
//!
//! Canonical entity types shared by every layer. Row mapping to and from
//! SQLite happens only in `database.rs`. All models use ULID for IDs and
//! chrono for timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// A ULID is a millisecond timestamp followed by 80 random bits, so ids
/// generated at submission time are unique and roughly time ordered.
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unknown enum string read from the store or from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// =============================================================================
// Listing
// =============================================================================

/// Moderation state of a listing
///
/// `Pending` is entered on submission. `Approved` and `Rejected` are
/// terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Pending,
    Approved,
    Rejected,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: ListingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }
}

impl FromStr for ListingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(UnknownVariant {
                kind: "listing status",
                value: s.to_string(),
            }),
        }
    }
}

/// Fixed set of listing categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Writing,
    ImageGeneration,
    CodeAssistant,
    DataAnalysis,
    Audio,
    Video,
    Chatbot,
    Productivity,
    Research,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Self::Writing,
        Self::ImageGeneration,
        Self::CodeAssistant,
        Self::DataAnalysis,
        Self::Audio,
        Self::Video,
        Self::Chatbot,
        Self::Productivity,
        Self::Research,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Writing => "writing",
            Self::ImageGeneration => "image-generation",
            Self::CodeAssistant => "code-assistant",
            Self::DataAnalysis => "data-analysis",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Chatbot => "chatbot",
            Self::Productivity => "productivity",
            Self::Research => "research",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    /// Case-insensitive; spaces and underscores are read as dashes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '_'], "-");
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| UnknownVariant {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// A sellable AI tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Whole currency units
    pub price: i64,
    pub category: Category,
    pub tags: Vec<String>,
    pub endpoint_url: String,
    /// Identity of the submitting seller
    pub creator_identity: String,
    pub created_at: DateTime<Utc>,
    pub status: ListingStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

/// A listing together with its review aggregates
///
/// `rating` is the mean review rating, 0.0 when unreviewed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub listing: Listing,
    pub rating: f64,
    pub review_count: i64,
}

// =============================================================================
// Review
// =============================================================================

/// Feedback left by a purchaser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    /// Weak reference to `Listing::id`
    pub listing_id: String,
    pub author_identity: String,
    pub author_display_name: String,
    /// 1..=5
    pub rating: i64,
    pub comment: String,
    pub created_at: DateTime<Utc>,
    pub verified_purchase: bool,
    pub helpful_count: i64,
}

// =============================================================================
// Purchase
// =============================================================================

/// Listing attributes captured at purchase time
///
/// Later price changes or deletion of the listing never alter this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub listing_id: String,
    pub title: String,
    pub price: i64,
}

impl PurchaseItem {
    pub fn snapshot(listing: &Listing) -> Self {
        Self {
            listing_id: listing.id.clone(),
            title: listing.title.clone(),
            price: listing.price,
        }
    }
}

/// A completed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub purchaser_identity: String,
    pub items: Vec<PurchaseItem>,
    /// Sum of item prices
    pub total: i64,
    pub purchased_at: DateTime<Utc>,
}

impl Purchase {
    pub fn contains_listing(&self, listing_id: &str) -> bool {
        self.items.iter().any(|item| item.listing_id == listing_id)
    }
}

/// Sum of item prices
///
/// # Errors
/// `InvalidFields` on `items` if the sum does not fit in an `i64`
pub fn items_total(items: &[PurchaseItem]) -> Result<i64, crate::error::AppError> {
    items
        .iter()
        .try_fold(0i64, |total, item| total.checked_add(item.price))
        .ok_or_else(|| crate::error::AppError::field("items", "order total is too large"))
}

// =============================================================================
// Checkout sessions
// =============================================================================

/// State of a provider checkout session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Open,
    Completed,
    Failed,
}

impl CheckoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for CheckoutStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(UnknownVariant {
                kind: "checkout status",
                value: s.to_string(),
            }),
        }
    }
}

/// Payment in flight at the provider
///
/// `items` is the snapshot that becomes the purchase on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider session id
    pub id: String,
    pub purchaser_identity: String,
    pub items: Vec<PurchaseItem>,
    pub total: i64,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckoutSession {
    pub fn contains_listing(&self, listing_id: &str) -> bool {
        self.items.iter().any(|item| item.listing_id == listing_id)
    }
}

// =============================================================================
// Users
// =============================================================================

/// Role flag carried by session tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            _ => Err(UnknownVariant {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

/// Known actor, recorded on first authenticated visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub identity: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}
