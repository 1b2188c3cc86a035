use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tracing::{error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::handlers::{CheckoutError, CheckoutHandler, CheckoutRequest};

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutHandler>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub url: String,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/checkout", post(create_checkout))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_checkout(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let error_url = state.checkout.config().error_url.clone();
    let error = |status: StatusCode, message: String| {
        (
            status,
            Json(ErrorResponse {
                url: error_url.clone(),
                error: message,
            }),
        )
    };

    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected malformed checkout request: {}", rejection.body_text());
        error(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;

    let span = info_span!("checkout", request_id = %Uuid::new_v4(), event_id = %request.event_id);
    match state.checkout.reserve(&request).instrument(span).await {
        Ok(outcome) => Ok(Json(CheckoutResponse {
            url: outcome.url().to_string(),
        })),
        Err(CheckoutError::InvalidRequest(message)) => {
            warn!(event_id = %request.event_id, "Rejected checkout request: {}", message);
            Err(error(StatusCode::BAD_REQUEST, message))
        }
        Err(e) => {
            error!(event_id = %request.event_id, "Failed to create checkout session: {}", e);
            Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create checkout session".to_string(),
            ))
        }
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
