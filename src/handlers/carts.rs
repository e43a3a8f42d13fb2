use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ApiError,
    handlers::common::{map_service_error, no_content_response, success_response, validate_input},
    services::carts::NewCartItem,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i32,
}

/// GET /cart — the caller's cart, created on first use
async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .carts
        .get_or_create_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    let view = state
        .services
        .carts
        .get_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// POST /cart/items — add an item (merging equal variants)
async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<NewCartItem>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let view = state
        .services
        .carts
        .add_item(user.user_id, payload)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// PUT /cart/items/{id} — set quantity, zero removes
async fn update_quantity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .services
        .carts
        .update_item_quantity(user.user_id, item_id, payload.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// DELETE /cart/items/{id}
async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .services
        .carts
        .remove_item(user.user_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(view))
}

/// DELETE /cart
async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .carts
        .clear_cart(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(no_content_response())
}

/// GET /cart/count — line count for the cart badge
async fn item_count(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .services
        .carts
        .item_count(user.user_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(json!({ "count": count })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/count", get(item_count))
        .route("/cart/items", post(add_item))
        .route("/cart/items/:id", put(update_quantity).delete(remove_item))
}
