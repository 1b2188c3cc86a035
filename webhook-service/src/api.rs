use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::events::StripeEvent;
use crate::handlers::{WebhookAck, WebhookHandler};
use crate::signature::{SignatureVerifier, SIGNATURE_HEADER};

pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<WebhookHandler>,
    pub verifier: Arc<SignatureVerifier>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub result: WebhookAck,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(health_check).post(receive_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if !state.verifier.is_configured() {
        error!("Webhook endpoint secret is not configured");
        return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook secret not configured"));
    }
    if body.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Empty request body"));
    }

    let signature = headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok());
    if let Err(e) = state.verifier.verify(signature, &body, Utc::now().timestamp()) {
        warn!("Rejected webhook delivery: {}", e);
        return Err(api_error(StatusCode::UNAUTHORIZED, e.to_string()));
    }

    let event = StripeEvent::parse(&body).map_err(|e| {
        warn!("Rejected unparsable webhook payload: {}", e);
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let span = info_span!("webhook", request_id = %Uuid::new_v4(), stripe_event_id = %event.id);
    match state.handler.handle(&event).instrument(span).await {
        Ok(result) => {
            info!(stripe_event_id = %event.id, "Webhook handled: {:?}", result);
            Ok(Json(WebhookResponse { received: true, result }))
        }
        Err(e) => {
            error!(stripe_event_id = %event.id, "Webhook processing failed: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
