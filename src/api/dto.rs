//! API request and response DTOs
//!
//! Entity responses reuse the canonical models directly; only request
//! bodies and action summaries live here.

use serde::{Deserialize, Serialize};

use crate::data::ListingStatus;

/// Summary returned by mutating endpoints that have no record to show
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub id: String,
    pub message: String,
}

impl ActionResponse {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// POST /admin/listings/:id/reject
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectListingRequest {
    #[serde(default)]
    pub reason: String,
}

/// POST /api/v1/listings/:id/reviews
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i64,
    #[serde(default)]
    pub comment: String,
}

/// POST /api/v1/checkout
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub listing_ids: Vec<String>,
}

/// POST /admin/integrity/repair
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepairRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// GET /admin/listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingQueueParams {
    /// `pending`, `approved`, `rejected` or `all`
    pub status: Option<String>,
}

impl ListingQueueParams {
    pub fn status(&self) -> Result<Option<ListingStatus>, crate::error::AppError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) if value.eq_ignore_ascii_case("all") => Ok(None),
            Some(value) => value
                .parse::<ListingStatus>()
                .map(Some)
                .map_err(|e| crate::error::AppError::field("status", e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_status_parses_known_values() {
        let params = |s: &str| ListingQueueParams {
            status: Some(s.to_string()),
        };
        assert_eq!(params("Pending").status().unwrap(), Some(ListingStatus::Pending));
        assert_eq!(params("all").status().unwrap(), None);
        assert_eq!(ListingQueueParams::default().status().unwrap(), None);
        assert!(params("archived").status().is_err());
    }
}
