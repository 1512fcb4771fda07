//! Common test utilities for E2E tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{Json, Router, extract::State, routing::post};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use toolmarket::auth::{Session, create_session_token};
use toolmarket::data::Role;
use toolmarket::payment::{SIGNATURE_HEADER, sign_webhook_payload};
use toolmarket::{AppState, config};

pub const ADMIN: &str = "admin@test.example.com";
pub const SELLER: &str = "seller@test.example.com";
pub const BUYER: &str = "buyer@test.example.com";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
    /// Checkout sessions opened against the stub provider
    pub provider_calls: Arc<AtomicUsize>,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let provider_calls = Arc::new(AtomicUsize::new(0));
        let provider_base = spawn_payment_provider(provider_calls.clone()).await;

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "test.example.com".to_string(),
                protocol: "https".to_string(),
            },
            database: config::DatabaseConfig { path: db_path },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-32-bytes-long!!".to_string(),
                session_max_age: 604800,
            },
            payment: config::PaymentConfig {
                api_base: provider_base,
                secret_key: "sk_test".to_string(),
                webhook_secret: "whsec_test".to_string(),
                success_url: "https://test.example.com/purchases".to_string(),
                cancel_url: "https://test.example.com/cart".to_string(),
                currency: "usd".to_string(),
                webhook_tolerance_seconds: 300,
            },
            catalog: config::CatalogConfig::default(),
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = toolmarket::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
            provider_calls,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Mint a session token the way the external issuer would
    pub fn token_for(&self, identity: &str, role: Role) -> String {
        let session = Session {
            identity: identity.to_string(),
            display_name: identity.split('@').next().unwrap_or(identity).to_string(),
            role,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::days(7),
        };

        create_session_token(&session, &self.state.config.auth.session_secret)
            .expect("Failed to create test token")
    }

    pub fn admin_token(&self) -> String {
        self.token_for(ADMIN, Role::Admin)
    }

    pub fn seller_token(&self) -> String {
        self.token_for(SELLER, Role::User)
    }

    pub fn buyer_token(&self) -> String {
        self.token_for(BUYER, Role::User)
    }

    /// Submit a listing as the seller and return its id
    pub async fn submit_listing(&self, title: &str, price: i64, category: &str) -> String {
        let response = self
            .client
            .post(self.url("/api/v1/listings"))
            .bearer_auth(self.seller_token())
            .json(&json!({
                "title": title,
                "description": format!("{title} does useful things for you"),
                "price": price,
                "category": category,
                "tags": ["ai"],
                "endpoint_url": "https://tools.example.com/run",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);

        let listing: Value = response.json().await.unwrap();
        listing["id"].as_str().unwrap().to_string()
    }

    pub async fn approve(&self, listing_id: &str) {
        let response = self
            .client
            .post(self.url(&format!("/admin/listings/{listing_id}/approve")))
            .bearer_auth(self.admin_token())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    /// Submit and approve in one step
    pub async fn approved_listing(&self, title: &str, price: i64, category: &str) -> String {
        let id = self.submit_listing(title, price, category).await;
        self.approve(&id).await;
        id
    }

    /// Deliver a webhook body signed with the configured secret
    pub async fn deliver_webhook(&self, body: &Value) -> reqwest::Response {
        let payload = serde_json::to_vec(body).unwrap();
        let signature = sign_webhook_payload(
            &payload,
            &self.state.config.payment.webhook_secret,
            Utc::now().timestamp(),
        )
        .unwrap();

        self.client
            .post(self.url("/api/v1/payments/webhook"))
            .header(SIGNATURE_HEADER, signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .unwrap()
    }

    /// Run a full checkout for the buyer and return the purchase id
    pub async fn buy(&self, token: &str, listing_ids: &[&str]) -> String {
        let response = self
            .client
            .post(self.url("/api/v1/checkout"))
            .bearer_auth(token)
            .json(&json!({ "listing_ids": listing_ids }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let handle: Value = response.json().await.unwrap();

        let response = self
            .deliver_webhook(&paid_event(handle["session_id"].as_str().unwrap()))
            .await;
        assert_eq!(response.status(), 200);
        let ack: Value = response.json().await.unwrap();
        assert_eq!(ack["outcome"], "recorded");
        ack["purchase_id"].as_str().unwrap().to_string()
    }
}

/// A `checkout.session.completed` event for a paid session
pub fn paid_event(session_id: &str) -> Value {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": { "object": { "id": session_id, "payment_status": "paid" } }
    })
}

pub fn expired_event(session_id: &str) -> Value {
    json!({
        "id": format!("evt_exp_{session_id}"),
        "type": "checkout.session.expired",
        "data": { "object": { "id": session_id } }
    })
}

/// Stand-in for the payment provider's checkout API
async fn spawn_payment_provider(calls: Arc<AtomicUsize>) -> String {
    async fn create_session(State(calls): State<Arc<AtomicUsize>>) -> Json<Value> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        Json(json!({
            "id": id,
            "url": format!("https://pay.test.example.com/{id}"),
        }))
    }

    let app = Router::new()
        .route("/v1/checkout/sessions", post(create_session))
        .with_state(calls);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}
