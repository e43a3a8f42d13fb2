use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use tracing::warn;

use crate::{
    errors::{ApiError, ServiceError},
    handlers::common::{map_service_error, success_response},
    services::payments::card::{verify_webhook_signature, WebhookEvent},
    AppState,
};

/// Header carrying the card gateway's webhook signature
const SIGNATURE_HEADER: &str = "webhook-signature";

/// POST /webhooks/payment — card gateway event delivery.
///
/// The signature covers the raw body, so verification happens before any
/// parsing. Unknown event types are acknowledged so the gateway stops
/// retrying them.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let secret = &state.config.card_webhook_secret;
    if secret.is_empty() {
        warn!("webhook received but no webhook secret is configured");
        return Err(ApiError::ServiceError(ServiceError::InternalError(
            "webhook secret not configured".into(),
        )));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing webhook signature".into()))?;

    verify_webhook_signature(
        secret,
        signature,
        &body,
        Utc::now().timestamp(),
        state.config.card_webhook_tolerance_secs,
    )
    .map_err(map_service_error)?;

    let event = WebhookEvent::parse(&body).map_err(map_service_error)?;
    state
        .services
        .payment_confirmation
        .handle_event(event)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({ "received": true })))
}

/// GET /checkout/redirect-return — signed return from the redirect gateway
async fn redirect_return(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .payment_confirmation
        .handle_redirect_return(&params)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/payment", post(payment_webhook))
        .route("/checkout/redirect-return", get(redirect_return))
}
