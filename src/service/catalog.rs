//! Catalog service
//!
//! Search, filter and sort over a snapshot of approved listings.
//! The engine itself (`filter_listings`) is pure; `CatalogService` only
//! loads the snapshot and applies it.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::data::{CatalogEntry, Category, Database, ListingStatus};
use crate::error::AppError;

/// Inclusive price bounds; `max = None` means no upper bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRange {
    pub min: i64,
    pub max: Option<i64>,
}

impl PriceRange {
    /// Parse a named bucket: `A-B` is `[A, B]`, `A+` is everything above `A`.
    ///
    /// `all` and the empty string mean no price filter.
    pub fn parse_bucket(bucket: &str) -> Result<Option<Self>, AppError> {
        let bucket = bucket.trim();
        if bucket.is_empty() || bucket.eq_ignore_ascii_case("all") {
            return Ok(None);
        }

        let invalid = || AppError::field("price", format!("unrecognised price range: {bucket}"));

        if let Some(lower) = bucket.strip_suffix('+') {
            let lower: i64 = lower.trim().parse().map_err(|_| invalid())?;
            return Ok(Some(Self {
                min: lower.saturating_add(1),
                max: None,
            }));
        }

        let (lower, upper) = bucket.split_once('-').ok_or_else(invalid)?;
        let min: i64 = lower.trim().parse().map_err(|_| invalid())?;
        let max: i64 = upper.trim().parse().map_err(|_| invalid())?;
        if min < 0 || min > max {
            return Err(invalid());
        }

        Ok(Some(Self {
            min,
            max: Some(max),
        }))
    }

    pub fn contains(&self, price: i64) -> bool {
        price >= self.min && self.max.is_none_or(|max| price <= max)
    }
}

/// Requested result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    /// Store order (newest first)
    #[default]
    Relevance,
    Newest,
    PriceAsc,
    PriceDesc,
    Rating,
    /// Review count, descending
    Popularity,
}

impl SortKey {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "relevance" | "default" => Ok(Self::Relevance),
            "newest" => Ok(Self::Newest),
            "price-asc" | "price-low" => Ok(Self::PriceAsc),
            "price-desc" | "price-high" => Ok(Self::PriceDesc),
            "rating" => Ok(Self::Rating),
            "popularity" | "popular" | "reviews" => Ok(Self::Popularity),
            _ => Err(AppError::field(
                "sort",
                format!("unrecognised sort key: {value}"),
            )),
        }
    }

    fn compare(&self, a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
        match self {
            Self::Relevance => Ordering::Equal,
            Self::Newest => b.listing.created_at.cmp(&a.listing.created_at),
            Self::PriceAsc => a.listing.price.cmp(&b.listing.price),
            Self::PriceDesc => b.listing.price.cmp(&a.listing.price),
            Self::Rating => b.rating.total_cmp(&a.rating),
            Self::Popularity => b.review_count.cmp(&a.review_count),
        }
    }
}

/// Raw catalog query parameters as they arrive on the wire
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogParams {
    pub q: Option<String>,
    pub category: Option<String>,
    /// Named bucket such as `1000-5000` or `5000+`
    pub price: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub min_rating: Option<f64>,
    pub sort: Option<String>,
}

/// Validated catalog filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogFilter {
    /// Lowercased; empty means no text filter
    pub search: String,
    /// `None` means all categories
    pub category: Option<Category>,
    pub price: Option<PriceRange>,
    /// 0.0 means no rating filter
    pub min_rating: f64,
    pub sort: SortKey,
}

impl TryFrom<CatalogParams> for CatalogFilter {
    type Error = AppError;

    fn try_from(params: CatalogParams) -> Result<Self, Self::Error> {
        let search = params
            .q
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .unwrap_or_default();

        let category = match params.category.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) if value.eq_ignore_ascii_case("all") => None,
            Some(value) => Some(
                value
                    .parse::<Category>()
                    .map_err(|e| AppError::field("category", e.to_string()))?,
            ),
        };

        // A named bucket takes precedence over explicit bounds
        let price = match params.price.as_deref() {
            Some(bucket) => PriceRange::parse_bucket(bucket)?,
            None => match (params.min_price, params.max_price) {
                (None, None) => None,
                (min, max) => {
                    let min = min.unwrap_or(0);
                    if max.is_some_and(|max| max < min) {
                        return Err(AppError::field(
                            "price",
                            "max_price must not be below min_price",
                        ));
                    }
                    Some(PriceRange { min, max })
                }
            },
        };

        let min_rating = params.min_rating.unwrap_or(0.0);
        if !(0.0..=5.0).contains(&min_rating) {
            return Err(AppError::field(
                "min_rating",
                "min_rating must be between 0 and 5",
            ));
        }

        let sort = match params.sort.as_deref() {
            Some(sort) => SortKey::parse(sort)?,
            None => SortKey::default(),
        };

        Ok(Self {
            search,
            category,
            price,
            min_rating,
            sort,
        })
    }
}

/// Filtered, ordered view plus the counts for "N of M" display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogPage {
    pub items: Vec<CatalogEntry>,
    /// Candidates before filtering
    pub total: usize,
    /// Entries left after filtering
    pub filtered: usize,
}

fn matches_search(entry: &CatalogEntry, term: &str) -> bool {
    let listing = &entry.listing;
    listing.title.to_lowercase().contains(term)
        || listing.description.to_lowercase().contains(term)
        || listing
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(term))
        || listing.category.as_str().contains(term)
        || listing.category.as_str().replace('-', " ").contains(term)
}

/// Apply `filter` to `entries`
///
/// The output is a subsequence of the input. Sorting is stable, so equal
/// keys keep their input order and repeated calls agree.
pub fn filter_listings(entries: &[CatalogEntry], filter: &CatalogFilter) -> CatalogPage {
    let mut items: Vec<CatalogEntry> = entries
        .iter()
        .filter(|entry| filter.search.is_empty() || matches_search(entry, &filter.search))
        .filter(|entry| {
            filter
                .category
                .is_none_or(|category| entry.listing.category == category)
        })
        .filter(|entry| {
            filter
                .price
                .is_none_or(|range| range.contains(entry.listing.price))
        })
        .filter(|entry| filter.min_rating <= 0.0 || entry.rating >= filter.min_rating)
        .cloned()
        .collect();

    items.sort_by(|a, b| filter.sort.compare(a, b));

    CatalogPage {
        total: entries.len(),
        filtered: items.len(),
        items,
    }
}

/// Catalog service
pub struct CatalogService {
    db: Arc<Database>,
}

impl CatalogService {
    /// Create new catalog service
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run a catalog query against the current approved listings
    pub async fn search(&self, filter: &CatalogFilter) -> Result<CatalogPage, AppError> {
        let snapshot = self.db.get_approved_catalog().await?;
        let page = filter_listings(&snapshot, filter);

        crate::metrics::CATALOG_QUERIES_TOTAL.inc();
        tracing::debug!(
            total = page.total,
            filtered = page.filtered,
            sort = ?filter.sort,
            "Catalog query served"
        );

        Ok(page)
    }

    /// Listing detail with aggregates
    ///
    /// Approved listings are public. Pending and rejected ones are visible
    /// only to their creator and to admins; everyone else gets `NotFound`.
    pub async fn get_entry(
        &self,
        id: &str,
        viewer: Option<&Identity>,
    ) -> Result<CatalogEntry, AppError> {
        let entry = self
            .db
            .get_catalog_entry(id)
            .await?
            .ok_or_else(|| AppError::not_found("listing", id))?;

        let visible = entry.listing.status == ListingStatus::Approved
            || viewer.is_some_and(|viewer| {
                viewer.is_admin() || viewer.id == entry.listing.creator_identity
            });

        if visible {
            Ok(entry)
        } else {
            Err(AppError::not_found("listing", id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::data::Listing;

    fn entry(id: &str, price: i64, rating: f64, review_count: i64) -> CatalogEntry {
        CatalogEntry {
            listing: Listing {
                id: id.to_string(),
                title: format!("Tool {id}"),
                description: "An assistant for everyday tasks".to_string(),
                price,
                category: Category::Productivity,
                tags: vec![],
                endpoint_url: "https://api.example.com".to_string(),
                creator_identity: "seller@example.com".to_string(),
                created_at: Utc::now(),
                status: ListingStatus::Approved,
                approved_at: Some(Utc::now()),
                rejected_at: None,
                rejection_reason: None,
            },
            rating,
            review_count,
        }
    }

    fn ids(page: &CatalogPage) -> Vec<&str> {
        page.items.iter().map(|e| e.listing.id.as_str()).collect()
    }

    fn filter(params: CatalogParams) -> CatalogFilter {
        CatalogFilter::try_from(params).unwrap()
    }

    #[test]
    fn open_ended_bucket_excludes_its_lower_bound() {
        let entries = vec![
            entry("a", 3000, 0.0, 0),
            entry("b", 5000, 0.0, 0),
            entry("c", 6000, 0.0, 0),
        ];
        let page = filter_listings(
            &entries,
            &filter(CatalogParams {
                price: Some("5000+".to_string()),
                ..Default::default()
            }),
        );

        assert_eq!(ids(&page), vec!["c"]);
        assert_eq!(page.total, 3);
        assert_eq!(page.filtered, 1);
    }

    #[test]
    fn closed_bucket_is_inclusive_on_both_ends() {
        let entries = vec![
            entry("a", 999, 0.0, 0),
            entry("b", 1000, 0.0, 0),
            entry("c", 5000, 0.0, 0),
            entry("d", 5001, 0.0, 0),
        ];
        let page = filter_listings(
            &entries,
            &filter(CatalogParams {
                price: Some("1000-5000".to_string()),
                ..Default::default()
            }),
        );

        assert_eq!(ids(&page), vec!["b", "c"]);
    }

    #[test]
    fn explicit_bounds_are_inclusive() {
        let entries = vec![entry("a", 100, 0.0, 0), entry("b", 200, 0.0, 0)];
        let page = filter_listings(
            &entries,
            &filter(CatalogParams {
                min_price: Some(200),
                ..Default::default()
            }),
        );
        assert_eq!(ids(&page), vec!["b"]);
    }

    #[test]
    fn bad_price_bucket_is_field_error() {
        for bucket in ["cheap", "500-100", "-", "abc+"] {
            let error = CatalogFilter::try_from(CatalogParams {
                price: Some(bucket.to_string()),
                ..Default::default()
            })
            .unwrap_err();
            assert!(
                matches!(&error, AppError::InvalidFields(fields) if fields.contains_key("price")),
                "{bucket} should be rejected"
            );
        }
    }

    #[test]
    fn search_matches_title_description_tags_and_category() {
        let mut tagged = entry("tagged", 1000, 0.0, 0);
        tagged.listing.tags = vec!["Transcription".to_string()];
        let mut described = entry("described", 1000, 0.0, 0);
        described.listing.description = "Generates SQL from prose".to_string();
        let mut categorised = entry("categorised", 1000, 0.0, 0);
        categorised.listing.category = Category::ImageGeneration;
        let plain = entry("plain", 1000, 0.0, 0);

        let entries = vec![tagged, described, categorised, plain];
        let search = |q: &str| {
            ids(&filter_listings(
                &entries,
                &filter(CatalogParams {
                    q: Some(q.to_string()),
                    ..Default::default()
                }),
            ))
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
        };

        assert_eq!(search("transcr"), vec!["tagged"]);
        assert_eq!(search("sql"), vec!["described"]);
        assert_eq!(search("image generation"), vec!["categorised"]);
        assert_eq!(search("TOOL PLAIN"), vec!["plain"]);
        assert_eq!(search("   ").len(), 4);
    }

    #[test]
    fn category_all_is_no_filter() {
        let mut writing = entry("w", 1000, 0.0, 0);
        writing.listing.category = Category::Writing;
        let entries = vec![writing, entry("p", 1000, 0.0, 0)];

        let all = filter_listings(
            &entries,
            &filter(CatalogParams {
                category: Some("ALL".to_string()),
                ..Default::default()
            }),
        );
        assert_eq!(all.filtered, 2);

        let only_writing = filter_listings(
            &entries,
            &filter(CatalogParams {
                category: Some("Writing".to_string()),
                ..Default::default()
            }),
        );
        assert_eq!(ids(&only_writing), vec!["w"]);
    }

    #[test]
    fn min_rating_zero_keeps_unrated() {
        let entries = vec![entry("unrated", 1000, 0.0, 0), entry("good", 1000, 4.5, 2)];

        let unfiltered = filter_listings(&entries, &CatalogFilter::default());
        assert_eq!(unfiltered.filtered, 2);

        let rated = filter_listings(
            &entries,
            &filter(CatalogParams {
                min_rating: Some(4.0),
                ..Default::default()
            }),
        );
        assert_eq!(ids(&rated), vec!["good"]);
    }

    #[test]
    fn sorting_is_stable_for_equal_keys() {
        let entries = vec![
            entry("first", 500, 4.0, 1),
            entry("second", 100, 5.0, 1),
            entry("third", 500, 3.0, 1),
        ];
        let by_price = filter(CatalogParams {
            sort: Some("price-desc".to_string()),
            ..Default::default()
        });

        let page = filter_listings(&entries, &by_price);
        assert_eq!(ids(&page), vec!["first", "third", "second"]);

        // Equal popularity everywhere: input order survives
        let by_popularity = filter(CatalogParams {
            sort: Some("popularity".to_string()),
            ..Default::default()
        });
        let page = filter_listings(&entries, &by_popularity);
        assert_eq!(ids(&page), vec!["first", "second", "third"]);
        assert_eq!(filter_listings(&entries, &by_popularity), page);
    }

    #[test]
    fn sort_keys_order_as_expected() {
        let mut old = entry("old", 300, 2.0, 10);
        old.listing.created_at = Utc::now() - Duration::days(2);
        let mid = entry("mid", 100, 5.0, 1);
        let mut new = entry("new", 200, 3.5, 4);
        new.listing.created_at = Utc::now() + Duration::days(1);
        let entries = vec![old, mid, new];

        let sorted = |key: &str| {
            let page = filter_listings(
                &entries,
                &filter(CatalogParams {
                    sort: Some(key.to_string()),
                    ..Default::default()
                }),
            );
            ids(&page).into_iter().map(str::to_string).collect::<Vec<_>>()
        };

        assert_eq!(sorted("relevance"), vec!["old", "mid", "new"]);
        assert_eq!(sorted("newest"), vec!["new", "mid", "old"]);
        assert_eq!(sorted("price-asc"), vec!["mid", "new", "old"]);
        assert_eq!(sorted("price-desc"), vec!["old", "new", "mid"]);
        assert_eq!(sorted("rating"), vec!["mid", "new", "old"]);
        assert_eq!(sorted("popularity"), vec!["old", "new", "mid"]);
    }

    #[test]
    fn filtering_is_a_projection() {
        let entries: Vec<CatalogEntry> = (0..20)
            .map(|i| entry(&format!("l{i}"), 100 + i * 500, (i % 6) as f64, i))
            .collect();
        let query = filter(CatalogParams {
            q: Some("tool".to_string()),
            price: Some("1000-6000".to_string()),
            min_rating: Some(2.0),
            sort: Some("rating".to_string()),
            ..Default::default()
        });

        let page = filter_listings(&entries, &query);
        assert!(page.filtered <= page.total);
        assert_eq!(page.filtered, page.items.len());
        assert!(page.items.iter().all(|item| entries.contains(item)));
    }

    #[test]
    fn no_matches_is_empty_not_error() {
        let entries = vec![entry("a", 1000, 0.0, 0)];
        let page = filter_listings(
            &entries,
            &filter(CatalogParams {
                q: Some("nothing like this".to_string()),
                ..Default::default()
            }),
        );
        assert!(page.items.is_empty());
        assert_eq!(page.total, 1);
    }
}
