//! SQLite database operations
//!
//! All record store access goes through this module. Rows are mapped to
//! the canonical models here and nowhere else: enum columns are stored as
//! their `as_str` form, list-valued columns as JSON text.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{Pool, Sqlite, SqlitePool};

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

/// Result of closing a paid checkout session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutCompletion {
    /// Session completed and its purchase stored
    Recorded,
    /// Session was not open; nothing written
    AlreadyClosed,
    /// Purchaser already owns an item; session failed, nothing recorded
    AlreadyOwned,
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: String,
    title: String,
    description: String,
    price: i64,
    category: String,
    tags_json: String,
    endpoint_url: String,
    creator_identity: String,
    created_at: DateTime<Utc>,
    status: String,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = AppError;

    fn try_from(row: ListingRow) -> Result<Self, Self::Error> {
        Ok(Listing {
            category: row.category.parse().map_err(corrupt_row)?,
            status: row.status.parse().map_err(corrupt_row)?,
            tags: decode_json("listings.tags_json", &row.tags_json)?,
            id: row.id,
            title: row.title,
            description: row.description,
            price: row.price,
            endpoint_url: row.endpoint_url,
            creator_identity: row.creator_identity,
            created_at: row.created_at,
            approved_at: row.approved_at,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CatalogRow {
    #[sqlx(flatten)]
    listing: ListingRow,
    rating: f64,
    review_count: i64,
}

impl TryFrom<CatalogRow> for CatalogEntry {
    type Error = AppError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        Ok(CatalogEntry {
            listing: row.listing.try_into()?,
            rating: row.rating,
            review_count: row.review_count,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: String,
    listing_id: String,
    author_identity: String,
    author_display_name: String,
    rating: i64,
    comment: String,
    created_at: DateTime<Utc>,
    verified_purchase: bool,
    helpful_count: i64,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Review {
            id: row.id,
            listing_id: row.listing_id,
            author_identity: row.author_identity,
            author_display_name: row.author_display_name,
            rating: row.rating,
            comment: row.comment,
            created_at: row.created_at,
            verified_purchase: row.verified_purchase,
            helpful_count: row.helpful_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PurchaseRow {
    id: String,
    purchaser_identity: String,
    items_json: String,
    total: i64,
    purchased_at: DateTime<Utc>,
}

impl TryFrom<PurchaseRow> for Purchase {
    type Error = AppError;

    fn try_from(row: PurchaseRow) -> Result<Self, Self::Error> {
        Ok(Purchase {
            items: decode_json("purchases.items_json", &row.items_json)?,
            id: row.id,
            purchaser_identity: row.purchaser_identity,
            total: row.total,
            purchased_at: row.purchased_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckoutRow {
    id: String,
    purchaser_identity: String,
    items_json: String,
    total: i64,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<CheckoutRow> for CheckoutSession {
    type Error = AppError;

    fn try_from(row: CheckoutRow) -> Result<Self, Self::Error> {
        Ok(CheckoutSession {
            items: decode_json("checkout_sessions.items_json", &row.items_json)?,
            status: row.status.parse().map_err(corrupt_row)?,
            id: row.id,
            purchaser_identity: row.purchaser_identity,
            total: row.total,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    identity: String,
    display_name: String,
    role: String,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            role: row.role.parse().map_err(corrupt_row)?,
            identity: row.identity,
            display_name: row.display_name,
            created_at: row.created_at,
            last_seen_at: row.last_seen_at,
        })
    }
}

fn corrupt_row(error: UnknownVariant) -> AppError {
    AppError::Internal(anyhow::anyhow!("corrupt row: {error}"))
}

fn decode_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, AppError> {
    serde_json::from_str(raw)
        .map_err(|error| AppError::Internal(anyhow::anyhow!("failed to decode {column}: {error}")))
}

fn encode_json<T: Serialize>(column: &str, value: &T) -> Result<String, AppError> {
    serde_json::to_string(value)
        .map_err(|error| AppError::Internal(anyhow::anyhow!("failed to encode {column}: {error}")))
}

/// Map a primary key collision to `Conflict`, everything else to `Database`.
fn map_insert_error(kind: &str, id: &str, error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            AppError::Conflict(format!("{kind} {id} already exists"))
        }
        _ => AppError::Database(error),
    }
}

const CATALOG_SELECT: &str = r#"
    SELECT l.*,
           CAST(COALESCE(AVG(r.rating), 0) AS REAL) AS rating,
           COUNT(r.id) AS review_count
    FROM listings l
    LEFT JOIN reviews r ON r.listing_id = l.id
"#;

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Insert a newly submitted listing
    ///
    /// # Errors
    /// `Conflict` if a listing with the same id already exists
    pub async fn insert_listing(&self, listing: &Listing) -> Result<(), AppError> {
        let tags_json = encode_json("listings.tags_json", &listing.tags)?;

        sqlx::query(
            r#"
            INSERT INTO listings (
                id, title, description, price, category, tags_json, endpoint_url,
                creator_identity, created_at, status, approved_at, rejected_at,
                rejection_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.title)
        .bind(&listing.description)
        .bind(listing.price)
        .bind(listing.category.as_str())
        .bind(&tags_json)
        .bind(&listing.endpoint_url)
        .bind(&listing.creator_identity)
        .bind(listing.created_at)
        .bind(listing.status.as_str())
        .bind(listing.approved_at)
        .bind(listing.rejected_at)
        .bind(&listing.rejection_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("listing", &listing.id, e))?;

        Ok(())
    }

    /// Get listing by ID
    pub async fn get_listing(&self, id: &str) -> Result<Option<Listing>, AppError> {
        sqlx::query_as::<_, ListingRow>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Listing::try_from)
            .transpose()
    }

    /// Get a listing with its review aggregates, any status
    pub async fn get_catalog_entry(&self, id: &str) -> Result<Option<CatalogEntry>, AppError> {
        let query = format!("{CATALOG_SELECT} WHERE l.id = ? GROUP BY l.id");
        sqlx::query_as::<_, CatalogRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(CatalogEntry::try_from)
            .transpose()
    }

    /// Snapshot of every approved listing with aggregates, newest first
    pub async fn get_approved_catalog(&self) -> Result<Vec<CatalogEntry>, AppError> {
        let query = format!(
            "{CATALOG_SELECT} WHERE l.status = ? GROUP BY l.id ORDER BY l.created_at DESC, l.id DESC"
        );
        sqlx::query_as::<_, CatalogRow>(&query)
            .bind(ListingStatus::Approved.as_str())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(CatalogEntry::try_from)
            .collect()
    }

    /// Listings in submission order, optionally filtered by status
    pub async fn get_listings_by_status(
        &self,
        status: Option<ListingStatus>,
    ) -> Result<Vec<Listing>, AppError> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, ListingRow>(
                    "SELECT * FROM listings WHERE status = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ListingRow>(
                    "SELECT * FROM listings ORDER BY created_at ASC, id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Listing::try_from).collect()
    }

    /// A seller's own listings, newest first
    pub async fn get_listings_by_creator(&self, identity: &str) -> Result<Vec<Listing>, AppError> {
        sqlx::query_as::<_, ListingRow>(
            "SELECT * FROM listings WHERE creator_identity = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Listing::try_from)
        .collect()
    }

    /// Every listing id, in storage order
    pub async fn get_all_listing_ids(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM listings ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids)
    }

    /// Get multiple listings by id (batch operation to avoid N+1)
    pub async fn get_listings_by_ids(&self, ids: &[String]) -> Result<Vec<Listing>, AppError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        // SQLite limits host parameters per statement
        let mut all_listings = Vec::new();

        for chunk in ids.chunks(100) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!("SELECT * FROM listings WHERE id IN ({})", placeholders);

            let mut query_builder = sqlx::query_as::<_, ListingRow>(&query);
            for id in chunk {
                query_builder = query_builder.bind(id);
            }

            for row in query_builder.fetch_all(&self.pool).await? {
                all_listings.push(Listing::try_from(row)?);
            }
        }

        Ok(all_listings)
    }

    /// Move a pending listing to approved
    ///
    /// # Returns
    /// `true` if the listing was pending and is now approved
    pub async fn approve_pending_listing(
        &self,
        id: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE listings SET status = ?, approved_at = ? WHERE id = ? AND status = ?",
        )
        .bind(ListingStatus::Approved.as_str())
        .bind(approved_at)
        .bind(id)
        .bind(ListingStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a pending listing to rejected, stamping the reason
    ///
    /// # Returns
    /// `true` if the listing was pending and is now rejected
    pub async fn reject_pending_listing(
        &self,
        id: &str,
        rejected_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET status = ?, rejected_at = ?, rejection_reason = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(ListingStatus::Rejected.as_str())
        .bind(rejected_at)
        .bind(reason)
        .bind(id)
        .bind(ListingStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a listing only while it is still pending
    pub async fn delete_pending_listing(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ? AND status = ?")
            .bind(id)
            .bind(ListingStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a listing regardless of status
    ///
    /// Reviews and purchases referencing it are left untouched.
    pub async fn delete_listing(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM listings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Listing counts keyed by status string
    pub async fn count_listings_by_status(&self) -> Result<Vec<(String, i64)>, AppError> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM listings GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    // =========================================================================
    // Reviews
    // =========================================================================

    /// Insert a review
    pub async fn insert_review(&self, review: &Review) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO reviews (
                id, listing_id, author_identity, author_display_name, rating,
                comment, created_at, verified_purchase, helpful_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&review.id)
        .bind(&review.listing_id)
        .bind(&review.author_identity)
        .bind(&review.author_display_name)
        .bind(review.rating)
        .bind(&review.comment)
        .bind(review.created_at)
        .bind(review.verified_purchase)
        .bind(review.helpful_count)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("review", &review.id, e))?;

        Ok(())
    }

    /// Get review by ID
    pub async fn get_review(&self, id: &str) -> Result<Option<Review>, AppError> {
        let review = sqlx::query_as::<_, ReviewRow>("SELECT * FROM reviews WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(review.map(Review::from))
    }

    /// Reviews of a listing, newest first
    pub async fn get_reviews_for_listing(&self, listing_id: &str) -> Result<Vec<Review>, AppError> {
        let reviews = sqlx::query_as::<_, ReviewRow>(
            "SELECT * FROM reviews WHERE listing_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews.into_iter().map(Review::from).collect())
    }

    /// Reviews written by one identity
    pub async fn get_reviews_by_author(&self, identity: &str) -> Result<Vec<Review>, AppError> {
        let reviews = sqlx::query_as::<_, ReviewRow>(
            "SELECT * FROM reviews WHERE author_identity = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;

        Ok(reviews.into_iter().map(Review::from).collect())
    }

    /// Add one to a review's helpful counter
    ///
    /// # Returns
    /// `false` when no review has that id
    pub async fn increment_review_helpful(&self, id: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE reviews SET helpful_count = helpful_count + 1 WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete review by ID
    pub async fn delete_review(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM reviews WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_reviews(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reviews")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Insert a purchase with its item snapshot
    pub async fn insert_purchase(&self, purchase: &Purchase) -> Result<(), AppError> {
        let items_json = encode_json("purchases.items_json", &purchase.items)?;

        sqlx::query(
            r#"
            INSERT INTO purchases (id, purchaser_identity, items_json, total, purchased_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.purchaser_identity)
        .bind(&items_json)
        .bind(purchase.total)
        .bind(purchase.purchased_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("purchase", &purchase.id, e))?;

        Ok(())
    }

    /// Purchase history of one identity, newest first
    pub async fn get_purchases_by_identity(
        &self,
        identity: &str,
    ) -> Result<Vec<Purchase>, AppError> {
        sqlx::query_as::<_, PurchaseRow>(
            "SELECT * FROM purchases WHERE purchaser_identity = ? ORDER BY purchased_at DESC, id DESC",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Purchase::try_from)
        .collect()
    }

    /// Every purchase, in storage order
    pub async fn get_all_purchases(&self) -> Result<Vec<Purchase>, AppError> {
        sqlx::query_as::<_, PurchaseRow>("SELECT * FROM purchases ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Purchase::try_from)
            .collect()
    }

    /// Replace the whole purchase collection in one transaction
    ///
    /// Destructive: rows absent from `purchases` are gone afterwards.
    pub async fn replace_purchases(&self, purchases: &[Purchase]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM purchases").execute(&mut *tx).await?;

        for purchase in purchases {
            let items_json = encode_json("purchases.items_json", &purchase.items)?;
            sqlx::query(
                r#"
                INSERT INTO purchases (id, purchaser_identity, items_json, total, purchased_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&purchase.id)
            .bind(&purchase.purchaser_identity)
            .bind(&items_json)
            .bind(purchase.total)
            .bind(purchase.purchased_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Number of purchases and the sum of their totals
    pub async fn purchase_totals(&self) -> Result<(i64, i64), AppError> {
        let totals = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(total), 0) FROM purchases",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }

    // =========================================================================
    // Checkout sessions
    // =========================================================================

    /// Record a checkout session opened at the payment provider
    pub async fn insert_checkout_session(&self, session: &CheckoutSession) -> Result<(), AppError> {
        let items_json = encode_json("checkout_sessions.items_json", &session.items)?;

        sqlx::query(
            r#"
            INSERT INTO checkout_sessions (
                id, purchaser_identity, items_json, total, status, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.purchaser_identity)
        .bind(&items_json)
        .bind(session.total)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error("checkout session", &session.id, e))?;

        Ok(())
    }

    /// Get checkout session by provider session id
    pub async fn get_checkout_session(
        &self,
        id: &str,
    ) -> Result<Option<CheckoutSession>, AppError> {
        sqlx::query_as::<_, CheckoutRow>("SELECT * FROM checkout_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(CheckoutSession::try_from)
            .transpose()
    }

    /// Open sessions started by `identity`
    pub async fn get_open_checkout_sessions_by_identity(
        &self,
        identity: &str,
    ) -> Result<Vec<CheckoutSession>, AppError> {
        sqlx::query_as::<_, CheckoutRow>(
            "SELECT * FROM checkout_sessions WHERE purchaser_identity = ? AND status = ? ORDER BY created_at ASC",
        )
        .bind(identity)
        .bind(CheckoutStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CheckoutSession::try_from)
        .collect()
    }

    /// Close an open session and store its purchase atomically
    ///
    /// If the purchaser already owns one of the items, the session is closed
    /// as failed and nothing is recorded. A session that is not open is left
    /// untouched.
    pub async fn complete_checkout_with_purchase(
        &self,
        session_id: &str,
        purchase: &Purchase,
    ) -> Result<CheckoutCompletion, AppError> {
        let items_json = encode_json("purchases.items_json", &purchase.items)?;
        let mut tx = self.pool.begin().await?;

        // Taking the write lock first serializes concurrent completions
        let result = sqlx::query(
            "UPDATE checkout_sessions SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(CheckoutStatus::Completed.as_str())
        .bind(purchase.purchased_at)
        .bind(session_id)
        .bind(CheckoutStatus::Open.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(CheckoutCompletion::AlreadyClosed);
        }

        let owned = sqlx::query_as::<_, PurchaseRow>(
            "SELECT * FROM purchases WHERE purchaser_identity = ?",
        )
        .bind(&purchase.purchaser_identity)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Purchase::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let already_owned = purchase.items.iter().any(|item| {
            owned
                .iter()
                .any(|existing| existing.contains_listing(&item.listing_id))
        });

        if already_owned {
            sqlx::query("UPDATE checkout_sessions SET status = ? WHERE id = ?")
                .bind(CheckoutStatus::Failed.as_str())
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(CheckoutCompletion::AlreadyOwned);
        }

        sqlx::query(
            r#"
            INSERT INTO purchases (id, purchaser_identity, items_json, total, purchased_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.purchaser_identity)
        .bind(&items_json)
        .bind(purchase.total)
        .bind(purchase.purchased_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CheckoutCompletion::Recorded)
    }

    /// Close an open session as failed
    pub async fn fail_checkout_session(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE checkout_sessions SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(CheckoutStatus::Failed.as_str())
        .bind(at)
        .bind(id)
        .bind(CheckoutStatus::Open.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Create the user on first sight, otherwise refresh name, role and
    /// last-seen time
    pub async fn upsert_user(
        &self,
        identity: &str,
        display_name: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<User, AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (identity, display_name, role, created_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(identity) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(identity)
        .bind(display_name)
        .bind(role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_user(identity)
            .await?
            .ok_or_else(|| AppError::not_found("user", identity))
    }

    /// Get user by identity
    pub async fn get_user(&self, identity: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    pub async fn count_users(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
