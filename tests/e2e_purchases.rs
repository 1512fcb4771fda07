//! E2E tests for checkout, the payment webhook, eligibility and reviews

mod common;

use std::sync::atomic::Ordering;

use chrono::Utc;
use common::{BUYER, TestServer, expired_event, paid_event};
use serde_json::{Value, json};
use toolmarket::data::{
    Category, CheckoutSession, CheckoutStatus, Listing, ListingStatus, PurchaseItem,
};
use toolmarket::payment::SIGNATURE_HEADER;

async fn eligibility(server: &TestServer, listing_id: &str, token: Option<&str>) -> Value {
    let mut request = server
        .client
        .get(server.url(&format!("/api/v1/listings/{listing_id}/eligibility")));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    request.send().await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn test_checkout_webhook_records_purchase_once() {
    let server = TestServer::new().await;
    let listing = server.approved_listing("Transcriber", 400, "audio").await;
    let token = server.buyer_token();

    let response = server
        .client
        .post(server.url("/api/v1/checkout"))
        .bearer_auth(&token)
        .json(&json!({ "listing_ids": [listing] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let handle: Value = response.json().await.unwrap();
    let session_id = handle["session_id"].as_str().unwrap();
    assert!(handle["redirect_url"].as_str().unwrap().ends_with(session_id));
    assert_eq!(server.provider_calls.load(Ordering::SeqCst), 1);

    // Nothing recorded until the provider confirms payment
    let purchases: Value = server
        .client
        .get(server.url("/api/v1/purchases"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(purchases, json!([]));

    let ack: Value = server
        .deliver_webhook(&paid_event(session_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ack["received"], true);
    assert_eq!(ack["outcome"], "recorded");

    // Providers redeliver; the second delivery must not double-record
    let ack: Value = server
        .deliver_webhook(&paid_event(session_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ack["outcome"], "duplicate");

    let purchases: Value = server
        .client
        .get(server.url("/api/v1/purchases"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let purchases = purchases.as_array().unwrap();
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0]["purchaser_identity"], BUYER);
    assert_eq!(purchases[0]["total"], 400);
    assert_eq!(purchases[0]["items"][0]["title"], "Transcriber");
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let server = TestServer::new().await;
    let body = serde_json::to_vec(&paid_event("cs_forged")).unwrap();

    let response = server
        .client
        .post(server.url("/api/v1/payments/webhook"))
        .header(SIGNATURE_HEADER, "t=1,v1=deadbeef")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = server
        .client
        .post(server.url("/api/v1/payments/webhook"))
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    for header in ["t=-9223372036854775808,v1=00", "t=9223372036854775807,v1=00"] {
        let response = server
            .client
            .post(server.url("/api/v1/payments/webhook"))
            .header(SIGNATURE_HEADER, header)
            .body(body.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401, "header {header}");
    }
}

#[tokio::test]
async fn test_webhook_for_unknown_session_is_404() {
    let server = TestServer::new().await;

    let response = server.deliver_webhook(&paid_event("cs_unknown")).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_expired_session_never_records() {
    let server = TestServer::new().await;
    let listing = server.approved_listing("Expiring", 250, "video").await;
    let token = server.buyer_token();

    let handle: Value = server
        .client
        .post(server.url("/api/v1/checkout"))
        .bearer_auth(&token)
        .json(&json!({ "listing_ids": [listing] }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = handle["session_id"].as_str().unwrap();

    let ack: Value = server
        .deliver_webhook(&expired_event(session_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ack["outcome"], "failed");

    // A late paid event for a failed session is not recorded
    let ack: Value = server
        .deliver_webhook(&paid_event(session_id))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ack["outcome"], "duplicate");

    let result = eligibility(&server, &listing, Some(&token)).await;
    assert_eq!(result["can_purchase"], true);
}

#[tokio::test]
async fn test_checkout_validation() {
    let server = TestServer::new().await;
    let approved = server.approved_listing("Approved", 300, "research").await;
    let pending = server.submit_listing("Pending", 300, "research").await;
    let token = server.buyer_token();

    let cases: [(Value, u16); 4] = [
        (json!({ "listing_ids": [] }), 400),
        (json!({ "listing_ids": [approved, approved] }), 400),
        (json!({ "listing_ids": [pending] }), 404),
        (json!({ "listing_ids": ["missing"] }), 404),
    ];
    for (body, status) in cases {
        let response = server
            .client
            .post(server.url("/api/v1/checkout"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), status, "body {body}");
    }
    assert_eq!(server.provider_calls.load(Ordering::SeqCst), 0);

    server.buy(&token, &[approved.as_str()]).await;

    // Already owned
    let response = server
        .client
        .post(server.url("/api/v1/checkout"))
        .bearer_auth(&token)
        .json(&json!({ "listing_ids": [approved] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_eligibility_and_review_flow() {
    let server = TestServer::new().await;
    let listing = server.approved_listing("Chat Helper", 300, "chatbot").await;
    let token = server.buyer_token();

    let anonymous = eligibility(&server, &listing, None).await;
    assert_eq!(
        anonymous,
        json!({ "can_purchase": false, "can_review": false })
    );

    let before = eligibility(&server, &listing, Some(&token)).await;
    assert_eq!(before, json!({ "can_purchase": true, "can_review": false }));

    // Reviewing before buying is refused
    let response = server
        .client
        .post(server.url(&format!("/api/v1/listings/{listing}/reviews")))
        .bearer_auth(&token)
        .json(&json!({ "rating": 5, "comment": "Great" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    server.buy(&token, &[listing.as_str()]).await;

    let after = eligibility(&server, &listing, Some(&token)).await;
    assert_eq!(after, json!({ "can_purchase": false, "can_review": true }));

    let response = server
        .client
        .post(server.url(&format!("/api/v1/listings/{listing}/reviews")))
        .bearer_auth(&token)
        .json(&json!({ "rating": 4, "comment": "Handles follow-ups well" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let review: Value = response.json().await.unwrap();
    assert_eq!(review["verified_purchase"], true);
    let review_id = review["id"].as_str().unwrap().to_string();

    let reviewed = eligibility(&server, &listing, Some(&token)).await;
    assert_eq!(
        reviewed,
        json!({ "can_purchase": false, "can_review": false })
    );

    // Second review is refused
    let response = server
        .client
        .post(server.url(&format!("/api/v1/listings/{listing}/reviews")))
        .bearer_auth(&token)
        .json(&json!({ "rating": 1, "comment": "Changed my mind" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = server
        .client
        .post(server.url(&format!("/api/v1/reviews/{review_id}/helpful")))
        .bearer_auth(server.seller_token())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let reviews: Value = server
        .client
        .get(server.url(&format!("/api/v1/listings/{listing}/reviews")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reviews[0]["helpful_count"], 1);

    let entry: Value = server
        .client
        .get(server.url(&format!("/api/v1/listings/{listing}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entry["rating"], 4.0);
    assert_eq!(entry["review_count"], 1);
}

#[tokio::test]
async fn test_review_rating_out_of_range() {
    let server = TestServer::new().await;
    let listing = server.approved_listing("Rated", 300, "productivity").await;
    let token = server.buyer_token();
    server.buy(&token, &[listing.as_str()]).await;

    let response = server
        .client
        .post(server.url(&format!("/api/v1/listings/{listing}/reviews")))
        .bearer_auth(&token)
        .json(&json!({ "rating": 6, "comment": "Too good" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_listing_in_open_checkout_cannot_be_checked_out_again() {
    let server = TestServer::new().await;
    let listing = server.approved_listing("Single Copy", 300, "research").await;
    let token = server.buyer_token();

    let checkout = || {
        server
            .client
            .post(server.url("/api/v1/checkout"))
            .bearer_auth(&token)
            .json(&json!({ "listing_ids": [listing] }))
            .send()
    };

    let response = checkout().await.unwrap();
    assert_eq!(response.status(), 200);
    let handle: Value = response.json().await.unwrap();

    let response = checkout().await.unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(server.provider_calls.load(Ordering::SeqCst), 1);

    // Once the first session expires the listing can be bought again
    server
        .deliver_webhook(&expired_event(handle["session_id"].as_str().unwrap()))
        .await;
    let response = checkout().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_two_paid_sessions_for_one_listing_record_one_purchase() {
    let server = TestServer::new().await;
    let listing = server.approved_listing("Raced", 300, "research").await;

    // Two sessions opened for the same listing, e.g. from separate devices
    for session_id in ["cs_race_1", "cs_race_2"] {
        server
            .state
            .db
            .insert_checkout_session(&CheckoutSession {
                id: session_id.to_string(),
                purchaser_identity: BUYER.to_string(),
                items: vec![PurchaseItem {
                    listing_id: listing.clone(),
                    title: "Raced".to_string(),
                    price: 300,
                }],
                total: 300,
                status: CheckoutStatus::Open,
                created_at: Utc::now(),
                completed_at: None,
            })
            .await
            .unwrap();
    }

    let first: Value = server
        .deliver_webhook(&paid_event("cs_race_1"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["outcome"], "recorded");

    let second: Value = server
        .deliver_webhook(&paid_event("cs_race_2"))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["outcome"], "already_owned");

    let purchases: Value = server
        .client
        .get(server.url("/api/v1/purchases"))
        .bearer_auth(server.buyer_token())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(purchases.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unchargeable_price_is_refused_at_checkout() {
    let server = TestServer::new().await;

    // Stored directly: submission caps prices, older rows may not be capped
    server
        .state
        .db
        .insert_listing(&Listing {
            id: "huge".to_string(),
            title: "Huge".to_string(),
            description: "Priced beyond what the provider can charge".to_string(),
            price: 100_000_000_000_000_000,
            category: Category::Other,
            tags: vec![],
            endpoint_url: "https://huge.example.com".to_string(),
            creator_identity: common::SELLER.to_string(),
            created_at: Utc::now(),
            status: ListingStatus::Approved,
            approved_at: Some(Utc::now()),
            rejected_at: None,
            rejection_reason: None,
        })
        .await
        .unwrap();

    let response = server
        .client
        .post(server.url("/api/v1/checkout"))
        .bearer_auth(server.buyer_token())
        .json(&json!({ "listing_ids": ["huge"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["fields"]["price"].is_string());
    assert_eq!(server.provider_calls.load(Ordering::SeqCst), 0);

    let response = server
        .client
        .post(server.url("/api/v1/listings"))
        .bearer_auth(server.seller_token())
        .json(&json!({
            "title": "Too Expensive",
            "description": "Nobody could ever pay for this",
            "price": 100_000_000_000_000_000i64,
            "category": "other",
            "endpoint_url": "https://x.example.com",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
