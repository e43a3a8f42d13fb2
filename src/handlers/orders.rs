use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{
        map_service_error, success_response, PaginatedResponse, PaginationParams,
    },
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct RefundRequestBody {
    pub reason: String,
}

/// GET /orders — the caller's orders, newest first
async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders(&user, pagination.offset(), pagination.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// GET /orders/{id}
async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .services
        .orders
        .get_order(&user, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// GET /orders/by-ref/{txn_ref} — lookup by redirect transaction reference
async fn get_order_by_ref(
    State(state): State<AppState>,
    user: AuthUser,
    Path(txn_ref): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .services
        .orders
        .find_by_txn_ref(&user, &txn_ref)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// POST /orders/{id}/received — customer confirms the order arrived
async fn confirm_received(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .confirm_received(&user, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// POST /orders/{id}/refund-request
async fn request_refund(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .request_refund(&user, id, payload.reason)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/by-ref/:txn_ref", get(get_order_by_ref))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/received", post(confirm_received))
        .route("/orders/:id/refund-request", post(request_refund))
}
