use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use crate::{
    auth::Staff,
    errors::ApiError,
    handlers::common::{map_service_error, success_response},
    AppState,
};

/// POST /shipping/orders — register a shipment with the carrier
async fn create_shipment(
    State(state): State<AppState>,
    Staff(_staff): Staff,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .services
        .carrier
        .create_shipment(payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(response))
}

/// GET /shipping/orders/{code}/status
async fn shipment_status(
    State(state): State<AppState>,
    Staff(_staff): Staff,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .services
        .carrier
        .shipment_status(&code)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(response))
}

/// POST /shipping/leadtime — delivery estimate for a destination
async fn estimate_leadtime(
    State(state): State<AppState>,
    Staff(_staff): Staff,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state
        .services
        .carrier
        .estimate_leadtime(payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(response))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/shipping/orders", post(create_shipment))
        .route("/shipping/orders/:code/status", get(shipment_status))
        .route("/shipping/leadtime", post(estimate_leadtime))
}
