//! User service
//!
//! Records known actors and reports marketplace totals for admins.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::auth::Identity;
use crate::data::{Database, User};
use crate::error::AppError;

/// Marketplace totals shown on the admin dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketplaceStats {
    /// Listing count per status
    pub listings: BTreeMap<String, i64>,
    pub purchases: i64,
    /// Sum of purchase totals as charged
    pub revenue: i64,
    pub reviews: i64,
    pub users: i64,
}

/// User service
pub struct UserService {
    db: Arc<Database>,
}

impl UserService {
    /// Create new user service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record the caller, creating the user on first sight
    pub async fn touch(&self, identity: &Identity) -> Result<User, AppError> {
        let user = self
            .db
            .upsert_user(
                &identity.id,
                &identity.display_name,
                identity.role,
                Utc::now(),
            )
            .await?;

        tracing::debug!(identity = %user.identity, role = user.role.as_str(), "User seen");
        Ok(user)
    }

    pub async fn stats(&self, admin: &Identity) -> Result<MarketplaceStats, AppError> {
        if !admin.is_admin() {
            return Err(AppError::Forbidden);
        }

        let listings = self
            .db
            .count_listings_by_status()
            .await?
            .into_iter()
            .collect();
        let (purchases, revenue) = self.db.purchase_totals().await?;

        Ok(MarketplaceStats {
            listings,
            purchases,
            revenue,
            reviews: self.db.count_reviews().await?,
            users: self.db.count_users().await?,
        })
    }
}
