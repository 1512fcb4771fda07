//! Data layer module
//!
//! Handles all data persistence:
//! - SQLite database operations
//! - Canonical entity models

mod database;
mod models;

pub use database::{CheckoutCompletion, Database};
pub use models::*;
