//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub payment: PaymentConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "tools.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://tools.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Session token configuration
///
/// Tokens are minted by an external issuer sharing `session_secret`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret key (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
}

/// Payment provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    /// Provider API base (e.g., "https://api.payments.example")
    pub api_base: String,
    /// Bearer key for provider API calls
    pub secret_key: String,
    /// Shared secret used to sign webhook deliveries
    pub webhook_secret: String,
    /// Where the provider redirects after a successful payment
    pub success_url: String,
    /// Where the provider redirects after an abandoned payment
    pub cancel_url: String,
    /// ISO 4217 currency code, lowercase
    pub currency: String,
    /// Maximum accepted age of a webhook signature timestamp
    pub webhook_tolerance_seconds: i64,
}

/// Catalog rules
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Lowest accepted listing price (default: 100)
    pub min_price: i64,
    /// Highest accepted listing price (default: 1000000)
    pub max_price: i64,
    /// Maximum number of tags kept per listing (default: 10)
    pub max_tags: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            min_price: 100,
            max_price: 1_000_000,
            max_tags: 10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (TOOLMARKET__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("server.domain", "localhost:8080")?
            .set_default("database.path", "data/toolmarket.db")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("payment.currency", "usd")?
            .set_default("payment.webhook_tolerance_seconds", 300)?
            .set_default("catalog.min_price", 100)?
            .set_default("catalog.max_price", 1_000_000)?
            .set_default("catalog.max_tags", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (TOOLMARKET__*)
            .add_source(
                Environment::with_prefix("TOOLMARKET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.payment.webhook_secret.trim().is_empty() {
            return Err(AppError::Config(
                "payment.webhook_secret must not be empty".to_string(),
            ));
        }

        if self.payment.webhook_tolerance_seconds <= 0 {
            return Err(AppError::Config(
                "payment.webhook_tolerance_seconds must be greater than 0".to_string(),
            ));
        }

        for (key, value) in [
            ("payment.api_base", &self.payment.api_base),
            ("payment.success_url", &self.payment.success_url),
            ("payment.cancel_url", &self.payment.cancel_url),
        ] {
            let parsed = url::Url::parse(value)
                .map_err(|e| AppError::Config(format!("{key} is not a valid URL: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::Config(format!("{key} must use http or https")));
            }
        }

        if self.catalog.min_price <= 0 {
            return Err(AppError::Config(
                "catalog.min_price must be greater than 0".to_string(),
            ));
        }

        // Prices are sent to the provider in minor units
        if self.catalog.max_price < self.catalog.min_price
            || self.catalog.max_price > i64::MAX / 100
        {
            return Err(AppError::Config(
                "catalog.max_price must be at least catalog.min_price and fit in minor units"
                    .to_string(),
            ));
        }

        if !self.should_use_secure_cookies() {
            tracing::warn!(
                domain = %self.server.domain,
                "Serving over plain http; session cookies will not be marked secure"
            );
        }

        Ok(())
    }
}
