//! HTTP surface tests driven through the router without a socket.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{settings, Harness};
use sale_service::api::{create_router, AppState, CheckoutResponse, ErrorResponse, PurchaseResponse};
use serde::de::DeserializeOwned;
use shared::{PurchaseRecord, Sale};
use tower::ServiceExt;

fn router(h: &Harness) -> Router {
    create_router(AppState {
        service: h.service.clone(),
        request_timeout: Duration::from_secs(5),
    })
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json<T: DeserializeOwned>(app: &Router, method: &str, uri: &str) -> (StatusCode, T) {
    let (status, body) = send(app, method, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_check() {
    let h = Harness::new(settings(1, 10));
    let (status, body) = send(&router(&h), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_checkout_validates_query() {
    let h = Harness::new(settings(1, 10));
    h.open_sale().await;
    let app = router(&h);

    let (status, body): (_, ErrorResponse) = send_json(&app, "POST", "/checkout?id=1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.error, "user_id query parameter is required");

    let (status, body): (_, ErrorResponse) = send_json(&app, "POST", "/checkout?user_id=u1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.error, "id query parameter is required");

    let (status, body): (_, ErrorResponse) =
        send_json(&app, "POST", "/checkout?user_id=u1&id=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.error, "Invalid item id format");
}

#[tokio::test]
async fn test_checkout_error_statuses() {
    let h = Harness::new(settings(1, 10));
    let app = router(&h);

    let (status, body): (_, ErrorResponse) =
        send_json(&app, "POST", "/checkout?user_id=u1&id=1").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body.error, "no active sale at the moment");

    h.open_sale().await;
    let (status, _): (_, ErrorResponse) =
        send_json(&app, "POST", "/checkout?user_id=u1&id=42").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_and_purchase_round_trip() {
    let h = Harness::new(settings(2, 1));
    h.open_sale().await;
    let app = router(&h);

    let (status, checkout): (_, CheckoutResponse) =
        send_json(&app, "POST", "/checkout?user_id=alice&id=2").await;
    assert_eq!(status, StatusCode::OK);

    let uri = format!("/purchase?code={}", checkout.code);
    let (status, body): (_, PurchaseResponse) = send_json(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.status, "success");
    assert_eq!(body.item_id, Some(2));

    let (status, body): (_, PurchaseResponse) = send_json(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.status, "failed");
    assert_eq!(body.message.as_deref(), Some("checkout code has already been used"));
    assert_eq!(body.item_id, None);

    let (status, _): (_, ErrorResponse) =
        send_json(&app, "POST", "/checkout?user_id=alice&id=1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, purchases): (_, Vec<PurchaseRecord>) =
        send_json(&app, "GET", "/sales/current/purchases?user_id=alice").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(purchases.len(), 1);
    assert_eq!(purchases[0].item_id, 2);
}

#[tokio::test]
async fn test_purchase_error_statuses() {
    let h = Harness::new(settings(1, 10));
    h.open_sale().await;
    let app = router(&h);

    let (status, body): (_, ErrorResponse) = send_json(&app, "POST", "/purchase").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.error, "code query parameter is required");

    let (status, body): (_, PurchaseResponse) =
        send_json(&app, "POST", "/purchase?code=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.message.as_deref(), Some("checkout code is invalid"));

    let first = h.checkout("alice", 1).await;
    let second = h.checkout("bob", 1).await;
    let (status, _): (_, PurchaseResponse) =
        send_json(&app, "POST", &format!("/purchase?code={first}")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body): (_, PurchaseResponse) =
        send_json(&app, "POST", &format!("/purchase?code={second}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.status, "failed");
}

#[tokio::test]
async fn test_current_sale() {
    let h = Harness::new(settings(3, 10));
    let app = router(&h);

    let (status, _): (_, ErrorResponse) = send_json(&app, "GET", "/sales/current").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let opened = h.open_sale().await;
    let (status, sale): (_, Sale) = send_json(&app, "GET", "/sales/current").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sale, opened);

    let (status, purchases): (_, Vec<PurchaseRecord>) =
        send_json(&app, "GET", "/sales/current/purchases?user_id=nobody").await;
    assert_eq!(status, StatusCode::OK);
    assert!(purchases.is_empty());
}
