use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};

use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{created_response, map_service_error},
    services::checkout::CheckoutRequest,
    AppState,
};

/// Best-effort client address for the redirect gateway's ip parameter.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// POST /checkout — create an order from the selected cart items and start
/// payment for the chosen method
async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip = client_ip(&headers);
    let outcome = state
        .services
        .checkout
        .checkout(&user, payload, &ip)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/checkout", post(checkout))
}
