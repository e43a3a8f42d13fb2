use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::{Manager, Staff},
    entities::order::{OrderStatus, PaymentStatus},
    errors::ApiError,
    handlers::common::{map_service_error, success_response, PaginatedResponse, PaginationParams},
    services::orders::OrderListFilter,
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct StaffOrderListQuery {
    #[serde(default = "crate::handlers::common::default_page")]
    pub page: u64,
    #[serde(default = "crate::handlers::common::default_per_page")]
    pub per_page: u64,
    /// Workflow bucket to show
    pub status: Option<OrderStatus>,
    /// Case-sensitive customer name fragment
    pub username: Option<String>,
}

impl StaffOrderListQuery {
    fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    /// Required when rejecting
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentStatusRequest {
    pub payment_status: PaymentStatus,
}

/// GET /staff/orders — workflow listing with bucket and customer filters
async fn list_orders(
    State(state): State<AppState>,
    Staff(_staff): Staff,
    Query(query): Query<StaffOrderListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let pagination = query.pagination();
    let filter = OrderListFilter {
        status: query.status,
        username_contains: query.username,
    };
    let (orders, total) = state
        .services
        .orders
        .list_orders_admin(filter, pagination.offset(), pagination.per_page)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(PaginatedResponse::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// PUT /staff/orders/{id}/status — advance the fulfillment state machine
async fn update_status(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(&staff, id, payload.status, payload.reason)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// PUT /staff/orders/{id}/payment-status — record COD settlement
async fn update_payment_status(
    State(state): State<AppState>,
    Staff(staff): Staff,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePaymentStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_payment_status(&staff, id, payload.payment_status)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// POST /staff/orders/{id}/refund/approve — manager only
async fn approve_refund(
    State(state): State<AppState>,
    Manager(manager): Manager,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .approve_refund(&manager, id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(order))
}

/// GET /staff/orders/{id}/interactions — audit trail, oldest first
async fn list_interactions(
    State(state): State<AppState>,
    Staff(_staff): Staff,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let interactions = state
        .services
        .orders
        .list_interactions(id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(interactions))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/staff/orders", get(list_orders))
        .route("/staff/orders/:id/status", put(update_status))
        .route("/staff/orders/:id/payment-status", put(update_payment_status))
        .route("/staff/orders/:id/refund/approve", post(approve_refund))
        .route("/staff/orders/:id/interactions", get(list_interactions))
}
