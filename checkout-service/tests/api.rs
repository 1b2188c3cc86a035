//! HTTP surface of the checkout callable.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use checkout_service::api::{create_router, AppState};
use checkout_service::handlers::{CheckoutConfig, CheckoutHandler};
use serde_json::{json, Value};
use shared::store::MemoryBackend;
use shared::testing::FakeProcessor;
use shared::{paths, Event, Store};
use tower::ServiceExt;

async fn app() -> (Router, Store) {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .insert(
            paths::event("evt-1", false),
            json!({
                "name": "Spring Gala",
                "capacity": 10,
                "vacancy": 10,
                "price": 2500,
                "paymentsActive": true,
                "organiserId": "org-1",
            }),
        )
        .await;
    backend
        .insert(
            paths::organiser("org-1"),
            json!({"stripeAccount": "acct_1", "stripeAccountActive": true}),
        )
        .await;
    let store = Store::new(backend);
    let handler = CheckoutHandler::new(store.clone(), Arc::new(FakeProcessor::new()), CheckoutConfig::default());
    let router = create_router(AppState {
        checkout: Arc::new(handler),
    });
    (router, store)
}

fn post_checkout(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/checkout")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_checkout_returns_session_url() {
    let (app, store) = app().await;
    let body = json!({
        "eventId": "evt-1",
        "isPrivate": false,
        "quantity": 2,
        "successUrl": "https://app.test/success",
        "cancelUrl": "https://app.test/cancel",
    });

    let response = app.oneshot(post_checkout(body.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["url"]
        .as_str()
        .unwrap()
        .starts_with("https://checkout.stripe.test/pay/"));
    let event = store
        .get_as::<Event>(&paths::event("evt-1", false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.vacancy, Some(8));
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let (app, _) = app().await;

    let response = app.oneshot(post_checkout("{not json".to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["url"], "/error");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_zero_quantity_is_bad_request() {
    let (app, store) = app().await;
    let body = json!({
        "eventId": "evt-1",
        "quantity": 0,
        "successUrl": "https://app.test/success",
        "cancelUrl": "https://app.test/cancel",
    });

    let response = app.oneshot(post_checkout(body.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let event = store
        .get_as::<Event>(&paths::event("evt-1", false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.vacancy, Some(10));
}

#[tokio::test]
async fn test_decline_is_a_successful_redirect() {
    let (app, _) = app().await;
    let body = json!({
        "eventId": "evt-1",
        "quantity": 11,
        "successUrl": "https://app.test/success",
        "cancelUrl": "https://app.test/cancel",
    });

    let response = app.oneshot(post_checkout(body.to_string())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["url"], "https://app.test/cancel");
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"OK");
}
