//! HTTP surface of the webhook endpoint: signatures, parsing and status codes.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::json;
use shared::store::MemoryBackend;
use shared::testing::FakeProcessor;
use shared::{paths, Store};
use tower::ServiceExt;
use webhook_service::api::{create_router, AppState, MAX_BODY_BYTES};
use webhook_service::handlers::{WebhookConfig, WebhookHandler};
use webhook_service::notifier::{Confirmation, Notifier};
use webhook_service::signature::{SignatureVerifier, DEFAULT_TOLERANCE_SECS, SIGNATURE_HEADER};

const SECRET: &str = "whsec_test";

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send_confirmation(&self, _confirmation: &Confirmation) -> anyhow::Result<()> {
        Ok(())
    }
}

async fn app_with_secret(secret: &str) -> Router {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .insert(
            paths::event("evt-1", false),
            json!({"name": "Spring Gala", "capacity": 10, "vacancy": 10}),
        )
        .await;
    let handler = WebhookHandler::new(
        Store::new(backend),
        Arc::new(FakeProcessor::new()),
        Arc::new(NullNotifier),
        WebhookConfig::default(),
    );
    create_router(AppState {
        handler: Arc::new(handler),
        verifier: Arc::new(SignatureVerifier::new(secret, DEFAULT_TOLERANCE_SECS)),
    })
}

async fn app() -> Router {
    app_with_secret(SECRET).await
}

fn envelope(kind: &str, object_id: &str) -> String {
    json!({
        "id": "evt_123",
        "type": kind,
        "account": "acct_1",
        "livemode": true,
        "data": {"object": {"id": object_id}},
    })
    .to_string()
}

fn signed(body: String) -> Request<Body> {
    let header = SignatureVerifier::new(SECRET, DEFAULT_TOLERANCE_SECS)
        .header_for(Utc::now().timestamp(), body.as_bytes())
        .unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(SIGNATURE_HEADER, header)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_signed_delivery_is_acknowledged() {
    let response = app()
        .await
        .oneshot(signed(envelope("payment_intent.canceled", "pi_unknown")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["received"], true);
    assert_eq!(body["result"], "ignored");
}

#[tokio::test]
async fn test_bad_signature_is_unauthorized() {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header(SIGNATURE_HEADER, format!("t={},v1=deadbeef", Utc::now().timestamp()))
        .body(Body::from(envelope("payment_intent.canceled", "pi_1")))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .body(Body::from(envelope("payment_intent.canceled", "pi_1")))
        .unwrap();

    let response = app().await.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unconfigured_secret_is_a_server_error() {
    let response = app_with_secret("")
        .await
        .oneshot(signed(envelope("payment_intent.canceled", "pi_1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_invalid_event_id_is_bad_request() {
    let body = json!({
        "id": "not-an-event",
        "type": "payment_intent.canceled",
        "data": {"object": {"id": "pi_1"}},
    })
    .to_string();

    let response = app().await.oneshot(signed(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unhandled_event_type_is_a_server_error() {
    let response = app()
        .await
        .oneshot(signed(envelope("charge.refunded", "ch_1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let body = "x".repeat(MAX_BODY_BYTES + 1);

    let response = app().await.oneshot(signed(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_get_webhook_is_a_health_check() {
    let response = app()
        .await
        .oneshot(Request::builder().uri("/webhook").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
