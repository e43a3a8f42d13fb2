use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::AuthUser,
    config::AppConfig,
    db::DbPool,
    entities::{
        cart, cart_item, order,
        order::{OrderStatus, PaymentMethod, PaymentStatus},
        order_item,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        carts,
        notifications::NotificationService,
        payments::redirect::{mint_txn_ref, RedirectGateway},
        payments::{CreateSessionRequest, PaymentGateway, SessionLineItem},
        reconciliation::CheckoutMetadata,
    },
};

/// Checkout request. The payment method drives dispatch after the order row
/// is created.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
    /// Cart item ids the shopper is buying now
    #[validate(length(min = 1))]
    pub selected_items: Vec<Uuid>,
    #[validate(length(min = 1, max = 16))]
    pub shipping_method: String,
    #[validate(range(min = 0))]
    pub shipping_fee: i64,
    /// Shipping address; required because the identity store does not hold one
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// What the client should do next to complete payment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentInstruction {
    /// Nothing left to pay online (cash on delivery)
    None,
    /// Open the gateway's hosted checkout page
    CheckoutSession { session_id: String, url: String },
    /// Send the shopper to the signed gateway URL
    RedirectTo { url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub total: i64,
    pub payment: PaymentInstruction,
}

/// Service running the checkout flow for all payment methods.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    redirect: RedirectGateway,
    notifications: NotificationService,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        redirect: RedirectGateway,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
            gateway,
            redirect,
            notifications,
        }
    }

    /// Runs checkout for the selected cart items.
    ///
    /// The order row is always created `pending` before any gateway call, so
    /// a gateway failure leaves a retriable order rather than a paid-but-
    /// missing one. Prices come from the cart snapshot, never the catalog.
    #[instrument(skip(self, user, request), fields(user_id = %user.user_id, method = request.payment_method.as_str()))]
    pub async fn checkout(
        &self,
        user: &AuthUser,
        request: CheckoutRequest,
        client_ip: &str,
    ) -> Result<CheckoutOutcome, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let address = request
            .address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ServiceError::ValidationError("Shipping address is required".into()))?;

        let cart_model = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user.user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart for user {} not found", user.user_id))
            })?;

        let cart_items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_model.id))
            .all(&*self.db)
            .await?;
        if cart_items.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".into()));
        }

        let selected: Vec<&cart_item::Model> = cart_items
            .iter()
            .filter(|item| request.selected_items.contains(&item.id))
            .collect();
        if selected.is_empty() {
            return Err(ServiceError::ValidationError(
                "No selected items found in cart".into(),
            ));
        }

        let total = order_total(&selected, request.shipping_fee);

        // Gateways reject tiny charges; fail before creating the order.
        let minimum = self.config.minimum_total_for(request.payment_method);
        if total < minimum {
            return Err(ServiceError::PaymentAmountTooLow { total, minimum });
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let txn_ref = match request.payment_method {
            PaymentMethod::Redirect => mint_txn_ref(now),
            _ => String::new(),
        };
        let payment_status = match request.payment_method {
            PaymentMethod::CashOnDelivery => PaymentStatus::Unpaid,
            _ => PaymentStatus::Pending,
        };

        let txn = self.db.begin().await?;
        let order_model = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user.user_id),
            username: Set(user.username.clone()),
            email: Set(user.email.clone()),
            address: Set(address),
            phone: Set(request.phone.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(payment_status),
            payment_method: Set(request.payment_method),
            shipping_method: Set(request.shipping_method.clone()),
            shipping_fee: Set(request.shipping_fee),
            total: Set(total),
            payment_intent_id: Set(txn_ref.clone()),
            gateway_session_id: Set(String::new()),
            refund_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for item in &selected {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                image: Set(item.image.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                weight_grams: Set(item.weight_grams),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;

        let selected_ids: Vec<Uuid> = selected.iter().map(|i| i.id).collect();
        let payment = match request.payment_method {
            PaymentMethod::CashOnDelivery => {
                self.finish_cod(&order_model, cart_model.id, &selected_ids)
                    .await?
            }
            PaymentMethod::CardSession => {
                self.start_card_session(&order_model, cart_model.id, &selected_ids, total)
                    .await?
            }
            PaymentMethod::Redirect => {
                self.start_redirect(&order_model, cart_model.id, &selected_ids, &txn_ref, total, client_ip)
                    .await?
            }
        };

        Ok(CheckoutOutcome {
            order_id,
            total,
            payment,
        })
    }

    /// COD completes immediately: purchased items leave the cart and the
    /// invoice goes out fire-and-forget.
    async fn finish_cod(
        &self,
        order_model: &order::Model,
        cart_id: Uuid,
        selected_ids: &[Uuid],
    ) -> Result<PaymentInstruction, ServiceError> {
        let txn = self.db.begin().await?;
        carts::remove_cart_items(&txn, cart_id, selected_ids).await?;
        txn.commit().await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_model.id))
            .all(&*self.db)
            .await?;
        self.notifications
            .send_invoice_detached(order_model.clone(), items);

        Ok(PaymentInstruction::None)
    }

    /// Opens a hosted checkout session. The cart is left untouched; the
    /// webhook removes the purchased items once payment is confirmed.
    async fn start_card_session(
        &self,
        order_model: &order::Model,
        cart_id: Uuid,
        selected_ids: &[Uuid],
        total: i64,
    ) -> Result<PaymentInstruction, ServiceError> {
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_model.id))
            .all(&*self.db)
            .await?;

        let mut line_items: Vec<SessionLineItem> = items
            .iter()
            .map(|item| SessionLineItem {
                name: item.product_name.clone(),
                amount: item.unit_price,
                quantity: item.quantity,
            })
            .collect();
        if order_model.shipping_fee > 0 {
            line_items.push(SessionLineItem {
                name: "Shipping".to_string(),
                amount: order_model.shipping_fee,
                quantity: 1,
            });
        }

        let metadata = CheckoutMetadata {
            user_id: order_model.user_id,
            cart_id,
            order_id: order_model.id,
            total,
            shipping_fee: order_model.shipping_fee,
            selected_items: selected_ids.to_vec(),
        };

        let session = self
            .gateway
            .create_checkout_session(CreateSessionRequest {
                line_items,
                success_url: self.config.checkout_success_url.clone(),
                cancel_url: self.config.checkout_cancel_url.clone(),
                metadata,
            })
            .await
            .map_err(|e| {
                error!(order_id = %order_model.id, error = %e, "checkout session failed");
                e
            })?;

        let mut active: order::ActiveModel = order_model.clone().into();
        active.gateway_session_id = Set(session.id.clone());
        if let Some(intent) = &session.payment_intent {
            active.payment_intent_id = Set(intent.clone());
        }
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                order_id: order_model.id,
                session_id: session.id.clone(),
            })
            .await;

        Ok(PaymentInstruction::CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Builds the signed redirect URL. By default the cart keeps the
    /// selection until the verified success return; the eager flag restores
    /// the legacy remove-before-redirect behavior.
    async fn start_redirect(
        &self,
        order_model: &order::Model,
        cart_id: Uuid,
        selected_ids: &[Uuid],
        txn_ref: &str,
        total: i64,
        client_ip: &str,
    ) -> Result<PaymentInstruction, ServiceError> {
        let order_info = format!("Thanh toan don hang {}", order_model.id);
        let url = self
            .redirect
            .build_payment_url(txn_ref, total, &order_info, client_ip, Utc::now());

        if self.config.redirect_eager_cart_removal {
            let txn = self.db.begin().await?;
            carts::remove_cart_items(&txn, cart_id, selected_ids).await?;
            txn.commit().await?;
        }

        Ok(PaymentInstruction::RedirectTo { url })
    }
}

/// Order total: snapshot line totals plus the shipping fee.
pub fn order_total(items: &[&cart_item::Model], shipping_fee: i64) -> i64 {
    items.iter().map(|i| i.line_total()).sum::<i64>() + shipping_fee
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn line(quantity: i32, unit_price: i64) -> cart_item::Model {
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "item".into(),
            image: None,
            quantity,
            unit_price,
            weight_grams: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn total_sums_lines_and_shipping() {
        let a = line(2, 100_000);
        let b = line(1, 50_000);
        assert_eq!(order_total(&[&a, &b], 20_000), 270_000);
    }

    #[test]
    fn total_of_single_selected_line() {
        let a = line(2, 100_000);
        assert_eq!(order_total(&[&a], 20_000), 220_000);
    }

    #[test]
    fn payment_instruction_serializes_tagged() {
        let json = serde_json::to_value(PaymentInstruction::RedirectTo {
            url: "https://pay.example".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "redirect_to");
        assert_eq!(json["url"], "https://pay.example");
    }

    #[test]
    fn checkout_request_requires_selection() {
        let request = CheckoutRequest {
            payment_method: PaymentMethod::CashOnDelivery,
            selected_items: vec![],
            shipping_method: "GHN".into(),
            shipping_fee: 0,
            address: Some("12 Nguyen Trai".into()),
            phone: None,
        };
        assert!(request.validate().is_err());
    }
}
