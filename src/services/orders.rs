use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    db::DbPool,
    entities::{
        order,
        order::{OrderStatus, PaymentStatus},
        order_interaction, order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::payments::PaymentGateway,
};

/// An order together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Filters for staff order listings.
#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    pub status: Option<OrderStatus>,
    pub username_contains: Option<String>,
}

/// Service for order lifecycle operations.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Fetches an order with its items. Customers may only read their own
    /// orders; staff may read any.
    #[instrument(skip(self, user))]
    pub async fn get_order(&self, user: &AuthUser, id: Uuid) -> Result<OrderView, ServiceError> {
        let order_model = self.require_order(id).await?;
        if order_model.user_id != user.user_id && !user.is_staff() {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(id))
            .all(&*self.db)
            .await?;
        Ok(OrderView {
            order: order_model,
            items,
        })
    }

    /// Looks an order up by its redirect-gateway transaction reference.
    #[instrument(skip(self, user))]
    pub async fn find_by_txn_ref(
        &self,
        user: &AuthUser,
        txn_ref: &str,
    ) -> Result<OrderView, ServiceError> {
        let order_model = order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(txn_ref))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order with reference {} not found", txn_ref))
            })?;
        self.get_order(user, order_model.id).await
    }

    /// Lists the caller's own orders, newest first. Offset and limit come
    /// from the request's [`PaginationParams`](crate::handlers::common::PaginationParams).
    #[instrument(skip(self, user))]
    pub async fn list_orders(
        &self,
        user: &AuthUser,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let query = order::Entity::find()
            .filter(order::Column::UserId.eq(user.user_id))
            .order_by_desc(order::Column::CreatedAt);
        let total = query.clone().count(&*self.db).await?;
        let orders = query.offset(offset).limit(limit).all(&*self.db).await?;
        Ok((orders, total))
    }

    /// Staff listing with workflow-bucket and customer filters.
    #[instrument(skip(self))]
    pub async fn list_orders_admin(
        &self,
        filter: OrderListFilter,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(needle) = filter.username_contains.filter(|n| !n.is_empty()) {
            query = query.filter(order::Column::Username.contains(needle.as_str()));
        }
        let total = query.clone().count(&*self.db).await?;
        let orders = query.offset(offset).limit(limit).all(&*self.db).await?;
        Ok((orders, total))
    }

    /// Customer confirmation that the order arrived. Allowed from
    /// `delivered`, or from `in_transit` when the shopper beats the
    /// carrier's status update.
    #[instrument(skip(self, user))]
    pub async fn confirm_received(
        &self,
        user: &AuthUser,
        id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order_model = self.require_order(id).await?;
        if order_model.user_id != user.user_id {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        if !matches!(
            order_model.status,
            OrderStatus::Delivered | OrderStatus::InTransit
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status {} cannot be confirmed as received",
                order_model.status.as_str()
            )));
        }
        self.apply_status(order_model, OrderStatus::Received, None)
            .await
    }

    /// Customer refund request. Allowed from any non-terminal state; the
    /// total is recomputed from the stored lines in case it was tampered
    /// with client-side.
    #[instrument(skip(self, user))]
    pub async fn request_refund(
        &self,
        user: &AuthUser,
        id: Uuid,
        reason: String,
    ) -> Result<order::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A refund reason is required".into(),
            ));
        }
        let order_model = self.require_order(id).await?;
        if order_model.user_id != user.user_id {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        if !order_model.status.can_transition(OrderStatus::RefundRequested) {
            return Err(ServiceError::InvalidStatusTransition {
                from: order_model.status.as_str().into(),
                to: OrderStatus::RefundRequested.as_str().into(),
            });
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(id))
            .all(&*self.db)
            .await?;
        let recomputed: i64 =
            items.iter().map(|i| i.line_total()).sum::<i64>() + order_model.shipping_fee;

        let old_status = order_model.status;
        let order_id = order_model.id;
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(OrderStatus::RefundRequested);
        active.refund_reason = Set(Some(reason));
        active.total = Set(recomputed);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.as_str().to_string(),
                new_status: OrderStatus::RefundRequested.as_str().to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Staff status advance. The transition is validated against the state
    /// machine, rejection requires a reason, and exactly one interaction
    /// record is appended in the same transaction.
    #[instrument(skip(self, staff))]
    pub async fn update_status(
        &self,
        staff: &AuthUser,
        id: Uuid,
        new_status: OrderStatus,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let order_model = self.require_order(id).await?;

        if !order_model.status.can_transition(new_status) {
            return Err(ServiceError::InvalidStatusTransition {
                from: order_model.status.as_str().into(),
                to: new_status.as_str().into(),
            });
        }
        let reason = reason.filter(|r| !r.trim().is_empty());
        if new_status == OrderStatus::Rejected && reason.is_none() {
            return Err(ServiceError::ValidationError(
                "Rejecting an order requires a reason".into(),
            ));
        }

        let old_status = order_model.status;
        let txn = self.db.begin().await?;

        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(new_status);
        if new_status == OrderStatus::Rejected {
            active.refund_reason = Set(reason);
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        append_interaction(
            &txn,
            id,
            staff.user_id,
            &format!("status:{}->{}", old_status.as_str(), new_status.as_str()),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: id,
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Staff payment-status update. Only the COD settlement move
    /// (`unpaid` → `received`) is accepted here; every other payment state
    /// belongs to the gateway reconciliation paths. Appends exactly one
    /// interaction record.
    #[instrument(skip(self, staff))]
    pub async fn update_payment_status(
        &self,
        staff: &AuthUser,
        id: Uuid,
        new_status: PaymentStatus,
    ) -> Result<order::Model, ServiceError> {
        let order_model = self.require_order(id).await?;
        let old_status = order_model.payment_status;
        if old_status == new_status {
            return Ok(order_model);
        }
        if !matches!(
            (old_status, new_status),
            (PaymentStatus::Unpaid, PaymentStatus::Received)
        ) {
            return Err(ServiceError::InvalidStatusTransition {
                from: old_status.as_str().into(),
                to: new_status.as_str().into(),
            });
        }

        let txn = self.db.begin().await?;
        let mut active: order::ActiveModel = order_model.into();
        active.payment_status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        append_interaction(
            &txn,
            id,
            staff.user_id,
            &format!(
                "payment_status:{}->{}",
                old_status.as_str(),
                new_status.as_str()
            ),
        )
        .await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentStatusChanged {
                order_id: id,
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Manager refund approval. Requires a pending refund request and a
    /// gateway correlation id; on gateway success the order is zeroed.
    #[instrument(skip(self, staff))]
    pub async fn approve_refund(
        &self,
        staff: &AuthUser,
        id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order_model = self.require_order(id).await?;

        if order_model.status != OrderStatus::RefundRequested {
            return Err(ServiceError::InvalidOperation(format!(
                "Order in status {} has no refund to approve",
                order_model.status.as_str()
            )));
        }
        if order_model.payment_intent_id.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Order has no gateway payment to refund".into(),
            ));
        }

        let receipt = self
            .gateway
            .create_refund(&order_model.payment_intent_id)
            .await
            .map_err(|e| {
                error!(order_id = %id, error = %e, "gateway refund failed");
                e
            })?;

        let txn = self.db.begin().await?;
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(OrderStatus::Refunded);
        active.payment_status = Set(PaymentStatus::Refunded);
        active.total = Set(0);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        append_interaction(
            &txn,
            id,
            staff.user_id,
            &format!("refund_approved:{}", receipt.id),
        )
        .await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderRefunded(id)).await;
        Ok(updated)
    }

    /// Audit trail for an order, oldest first.
    #[instrument(skip(self))]
    pub async fn list_interactions(
        &self,
        id: Uuid,
    ) -> Result<Vec<order_interaction::Model>, ServiceError> {
        self.require_order(id).await?;
        Ok(order_interaction::Entity::find()
            .filter(order_interaction::Column::OrderId.eq(id))
            .order_by_asc(order_interaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    async fn require_order(&self, id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }

    async fn apply_status(
        &self,
        order_model: order::Model,
        new_status: OrderStatus,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let old_status = order_model.status;
        let order_id = order_model.id;
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(new_status);
        if let Some(reason) = reason {
            active.refund_reason = Set(Some(reason));
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await;
        Ok(updated)
    }
}

/// Appends one audit record for a staff mutation. Runs inside the caller's
/// transaction so the mutation and its audit row commit together.
async fn append_interaction<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    staff_id: Uuid,
    action: &str,
) -> Result<(), ServiceError> {
    order_interaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        staff_id: Set(staff_id),
        action: Set(action.to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}
