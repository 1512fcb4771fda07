//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{Counter, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Catalog Metrics
    pub static ref CATALOG_QUERIES_TOTAL: IntCounter = IntCounter::new(
        "toolmarket_catalog_queries_total",
        "Total number of catalog queries served"
    ).expect("metric can be created");

    // Listing lifecycle Metrics
    pub static ref LISTING_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("toolmarket_listing_transitions_total", "Total number of listing lifecycle transitions"),
        &["transition"]
    ).expect("metric can be created");

    // Commerce Metrics
    pub static ref PURCHASES_TOTAL: IntCounter = IntCounter::new(
        "toolmarket_purchases_total",
        "Total number of recorded purchases"
    ).expect("metric can be created");
    pub static ref PURCHASE_REVENUE_TOTAL: Counter = Counter::new(
        "toolmarket_purchase_revenue_total",
        "Sum of recorded purchase totals"
    ).expect("metric can be created");
    pub static ref REVIEWS_TOTAL: IntCounter = IntCounter::new(
        "toolmarket_reviews_total",
        "Total number of recorded reviews"
    ).expect("metric can be created");
    pub static ref PAYMENT_WEBHOOKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("toolmarket_payment_webhooks_total", "Total number of payment webhook deliveries"),
        &["outcome"]
    ).expect("metric can be created");

    // Integrity Metrics
    pub static ref INTEGRITY_AUDITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("toolmarket_integrity_audits_total", "Total number of integrity audits"),
        &["result"]
    ).expect("metric can be created");
    pub static ref INTEGRITY_REPAIRS_TOTAL: IntCounter = IntCounter::new(
        "toolmarket_integrity_repairs_total",
        "Total number of purchase repairs performed"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("toolmarket_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
///
/// Safe to call more than once; later registrations of the same
/// collector are ignored.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CATALOG_QUERIES_TOTAL.clone()),
        Box::new(LISTING_TRANSITIONS_TOTAL.clone()),
        Box::new(PURCHASES_TOTAL.clone()),
        Box::new(PURCHASE_REVENUE_TOTAL.clone()),
        Box::new(REVIEWS_TOTAL.clone()),
        Box::new(PAYMENT_WEBHOOKS_TOTAL.clone()),
        Box::new(INTEGRITY_AUDITS_TOTAL.clone()),
        Box::new(INTEGRITY_REPAIRS_TOTAL.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(%error, "Metric already registered");
        }
    }

    tracing::info!("Metrics registry initialized");
}

/// Record a lifecycle transition (`submit`, `approve`, `reject`, `delete`).
pub fn observe_transition(transition: &str) {
    LISTING_TRANSITIONS_TOTAL
        .with_label_values(&[transition])
        .inc();
}
