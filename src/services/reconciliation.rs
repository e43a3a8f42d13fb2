use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
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
        payments::card::{WebhookEvent, WebhookObject},
        payments::redirect::{RedirectGateway, RESPONSE_CODE_SUCCESS},
    },
};

/// Correlation metadata attached to every gateway checkout session.
///
/// Typed on both sides of the gateway boundary; the string map the gateway
/// stores is produced by [`CheckoutMetadata::to_map`] and parsed back with
/// [`CheckoutMetadata::from_map`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub order_id: Uuid,
    pub total: i64,
    pub shipping_fee: i64,
    pub selected_items: Vec<Uuid>,
}

impl CheckoutMetadata {
    pub fn to_map(&self) -> HashMap<String, String> {
        let selected = self
            .selected_items
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        HashMap::from([
            ("user_id".to_string(), self.user_id.to_string()),
            ("cart_id".to_string(), self.cart_id.to_string()),
            ("order_id".to_string(), self.order_id.to_string()),
            ("total".to_string(), self.total.to_string()),
            ("shipping_fee".to_string(), self.shipping_fee.to_string()),
            ("selected_items".to_string(), selected),
        ])
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ServiceError> {
        fn field<'a>(
            map: &'a HashMap<String, String>,
            key: &str,
        ) -> Result<&'a str, ServiceError> {
            map.get(key).map(String::as_str).ok_or_else(|| {
                ServiceError::ValidationError(format!("Webhook metadata missing '{}'", key))
            })
        }
        fn parse_uuid(value: &str, key: &str) -> Result<Uuid, ServiceError> {
            Uuid::parse_str(value).map_err(|_| {
                ServiceError::ValidationError(format!("Webhook metadata '{}' is not a uuid", key))
            })
        }
        fn parse_i64(value: &str, key: &str) -> Result<i64, ServiceError> {
            value.parse().map_err(|_| {
                ServiceError::ValidationError(format!("Webhook metadata '{}' is not a number", key))
            })
        }

        let selected_items = field(map, "selected_items")?
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| parse_uuid(s, "selected_items"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            user_id: parse_uuid(field(map, "user_id")?, "user_id")?,
            cart_id: parse_uuid(field(map, "cart_id")?, "cart_id")?,
            order_id: parse_uuid(field(map, "order_id")?, "order_id")?,
            total: parse_i64(field(map, "total")?, "total")?,
            shipping_fee: parse_i64(field(map, "shipping_fee")?, "shipping_fee")?,
            selected_items,
        })
    }
}

/// How `selected_items` in the metadata identifies cart lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// Ids are cart-item ids (card session flow)
    CartItem,
    /// Ids are product ids (legacy payloads)
    Product,
}

/// A line ready to be written as an order item.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSnapshot {
    pub cart_item_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub image: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub weight_grams: i32,
}

/// Re-derives the purchased lines from the cart contents and the session
/// metadata. Pure so payload variants can be tested without a database.
pub fn reconcile_lines(
    cart_items: &[cart_item::Model],
    metadata: &CheckoutMetadata,
    scheme: IdScheme,
) -> Vec<LineSnapshot> {
    cart_items
        .iter()
        .filter(|item| {
            let key = match scheme {
                IdScheme::CartItem => item.id,
                IdScheme::Product => item.product_id,
            };
            metadata.selected_items.contains(&key)
        })
        .map(|item| LineSnapshot {
            cart_item_id: item.id,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            image: item.image.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            weight_grams: item.weight_grams,
        })
        .collect()
}

/// Outcome of a redirect-gateway return.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectOutcome {
    pub order_id: Uuid,
    pub paid: bool,
}

/// Finalizes orders from gateway webhooks and redirect returns.
#[derive(Clone)]
pub struct PaymentConfirmationService {
    db: Arc<DbPool>,
    config: Arc<AppConfig>,
    event_sender: Arc<EventSender>,
    notifications: NotificationService,
    redirect: RedirectGateway,
}

impl PaymentConfirmationService {
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        notifications: NotificationService,
        redirect: RedirectGateway,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
            notifications,
            redirect,
        }
    }

    /// Dispatches a verified webhook event. Unknown event types are
    /// acknowledged without action so the gateway stops retrying them.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn handle_event(&self, event: WebhookEvent) -> Result<(), ServiceError> {
        match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_session_completed(event.data.object).await,
            "charge.refunded" => self.handle_charge_refunded(event.data.object).await,
            "checkout.session.expired" | "payment_intent.canceled" => {
                self.handle_session_closed(&event.data.object.id).await
            }
            other => {
                info!(event_type = %other, "ignoring unhandled webhook event");
                Ok(())
            }
        }
    }

    /// Finalizes a paid checkout session.
    ///
    /// Idempotent on the payment intent id: replays against an order that is
    /// already prepaid are acknowledged without touching anything.
    #[instrument(skip(self, object), fields(session_id = %object.id))]
    pub async fn handle_session_completed(
        &self,
        object: WebhookObject,
    ) -> Result<(), ServiceError> {
        let payment_intent = object
            .payment_intent
            .clone()
            .unwrap_or_else(|| object.id.clone());

        if let Some(existing) = order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent.clone()))
            .one(&*self.db)
            .await?
        {
            if existing.payment_status == PaymentStatus::Prepaid {
                info!(order_id = %existing.id, "payment already recorded, ignoring replay");
                return Ok(());
            }
        }

        let metadata = CheckoutMetadata::from_map(&object.metadata)?;

        let txn = self.db.begin().await?;

        // The checkout row normally exists; recreate it from the metadata if
        // the session outlived it.
        let order_model = match order::Entity::find_by_id(metadata.order_id).one(&txn).await? {
            Some(found) => found,
            None => {
                warn!(order_id = %metadata.order_id, "order missing at webhook time, creating from metadata");
                self.create_deferred_order(&txn, &metadata).await?
            }
        };

        let cart_items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(metadata.cart_id))
            .all(&txn)
            .await?;

        let existing_lines = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_model.id))
            .all(&txn)
            .await?;

        let lines = if existing_lines.is_empty() {
            let mut lines = reconcile_lines(&cart_items, &metadata, IdScheme::CartItem);
            if lines.is_empty() {
                lines = reconcile_lines(&cart_items, &metadata, IdScheme::Product);
            }
            let now = Utc::now();
            for line in &lines {
                order_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    order_id: Set(order_model.id),
                    product_id: Set(line.product_id),
                    product_name: Set(line.product_name.clone()),
                    image: Set(line.image.clone()),
                    quantity: Set(line.quantity),
                    unit_price: Set(line.unit_price),
                    weight_grams: Set(line.weight_grams),
                    created_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
            lines
        } else {
            // Lines were snapshotted at checkout; only the cart removal and
            // status updates remain.
            reconcile_lines(&cart_items, &metadata, IdScheme::CartItem)
        };

        let order_id = order_model.id;
        let old_status = order_model.status;
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(OrderStatus::Processing);
        active.payment_status = Set(PaymentStatus::Prepaid);
        active.payment_intent_id = Set(payment_intent.clone());
        active.gateway_session_id = Set(object.id.clone());
        active.total = Set(metadata.total);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        let purchased: Vec<Uuid> = lines.iter().map(|l| l.cart_item_id).collect();
        if cart::Entity::find_by_id(metadata.cart_id).one(&txn).await?.is_some() {
            carts::remove_cart_items(&txn, metadata.cart_id, &purchased).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.as_str().to_string(),
                new_status: OrderStatus::Processing.as_str().to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                order_id,
                payment_intent_id: payment_intent,
            })
            .await;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        self.notifications.send_invoice_detached(updated, items);

        Ok(())
    }

    /// Marks an order refunded after the gateway confirms the refund.
    #[instrument(skip(self, object))]
    pub async fn handle_charge_refunded(&self, object: WebhookObject) -> Result<(), ServiceError> {
        let payment_intent = object
            .payment_intent
            .clone()
            .unwrap_or_else(|| object.id.clone());

        let Some(order_model) = order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent.clone()))
            .one(&*self.db)
            .await?
        else {
            warn!(%payment_intent, "refund webhook for unknown payment, acknowledging");
            return Ok(());
        };

        let order_id = order_model.id;
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(OrderStatus::Refunded);
        active.payment_status = Set(PaymentStatus::Refunded);
        active.total = Set(0);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender.send_or_log(Event::OrderRefunded(order_id)).await;
        Ok(())
    }

    /// Closes out an expired or canceled checkout session. The cart was
    /// never touched on the session path, so the shopper's selection is
    /// still intact.
    #[instrument(skip(self))]
    pub async fn handle_session_closed(&self, session_id: &str) -> Result<(), ServiceError> {
        let Some(order_model) = order::Entity::find()
            .filter(order::Column::GatewaySessionId.eq(session_id))
            .one(&*self.db)
            .await?
        else {
            warn!(%session_id, "closed session for unknown order, acknowledging");
            return Ok(());
        };

        if order_model.status != OrderStatus::Pending {
            return Ok(());
        }

        let order_id = order_model.id;
        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(OrderStatus::Canceled);
        active.payment_status = Set(PaymentStatus::Failed);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::PaymentFailed { order_id })
            .await;
        Ok(())
    }

    /// Handles the signed return from the redirect gateway.
    #[instrument(skip(self, params))]
    pub async fn handle_redirect_return(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<RedirectOutcome, ServiceError> {
        self.redirect.verify_return(params)?;

        let txn_ref = params
            .get("txn_ref")
            .ok_or_else(|| ServiceError::ValidationError("Missing txn_ref".into()))?;
        let response_code = params
            .get("response_code")
            .ok_or_else(|| ServiceError::ValidationError("Missing response_code".into()))?;

        let order_model = order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(txn_ref.clone()))
            .filter(order::Column::PaymentMethod.eq(PaymentMethod::Redirect))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order with reference {} not found", txn_ref))
            })?;

        // Returns arrive as GETs and anyone who saw the URL can replay one.
        // A settled order is never reopened by a later return, whatever the
        // response code says.
        if order_model.payment_status == PaymentStatus::Prepaid {
            return Ok(RedirectOutcome {
                order_id: order_model.id,
                paid: true,
            });
        }

        if response_code != RESPONSE_CODE_SUCCESS {
            let order_id = order_model.id;
            if order_model.status != OrderStatus::Pending {
                warn!(
                    %order_id,
                    status = order_model.status.as_str(),
                    "failure return for a non-pending order, acknowledging"
                );
                return Ok(RedirectOutcome {
                    order_id,
                    paid: false,
                });
            }
            let mut active: order::ActiveModel = order_model.into();
            active.status = Set(OrderStatus::Failed);
            active.payment_status = Set(PaymentStatus::Failed);
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;

            self.event_sender
                .send_or_log(Event::PaymentFailed { order_id })
                .await;
            return Ok(RedirectOutcome {
                order_id,
                paid: false,
            });
        }

        let order_id = order_model.id;
        let user_id = order_model.user_id;
        let old_status = order_model.status;

        let txn = self.db.begin().await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let mut active: order::ActiveModel = order_model.into();
        active.status = Set(OrderStatus::Processing);
        active.payment_status = Set(PaymentStatus::Prepaid);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        // Cart removal was deferred until this verified success, unless the
        // deployment opted into the eager legacy behavior at checkout time.
        if !self.config.redirect_eager_cart_removal {
            if let Some(cart_model) = cart::Entity::find()
                .filter(cart::Column::UserId.eq(user_id))
                .one(&txn)
                .await?
            {
                let purchased: Vec<(Uuid, i32)> = items
                    .iter()
                    .map(|i| (i.product_id, i.weight_grams))
                    .collect();
                carts::remove_matching_products(&txn, cart_model.id, &purchased).await?;
            }
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.as_str().to_string(),
                new_status: OrderStatus::Processing.as_str().to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::PaymentConfirmed {
                order_id,
                payment_intent_id: txn_ref.clone(),
            })
            .await;

        self.notifications.send_invoice_detached(updated, items);

        Ok(RedirectOutcome {
            order_id,
            paid: true,
        })
    }

    async fn create_deferred_order<C: sea_orm::ConnectionTrait>(
        &self,
        conn: &C,
        metadata: &CheckoutMetadata,
    ) -> Result<order::Model, ServiceError> {
        let now = Utc::now();
        let model = order::ActiveModel {
            id: Set(metadata.order_id),
            user_id: Set(metadata.user_id),
            // Contact details live in the external identity store; the
            // storefront backfills them when the shopper next loads the order.
            username: Set(String::new()),
            email: Set(String::new()),
            address: Set(String::new()),
            phone: Set(None),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            payment_method: Set(PaymentMethod::CardSession),
            shipping_method: Set("GHN".to_string()),
            shipping_fee: Set(metadata.shipping_fee),
            total: Set(metadata.total),
            payment_intent_id: Set(String::new()),
            gateway_session_id: Set(String::new()),
            refund_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cart_line(name: &str, quantity: i32, unit_price: i64, weight: i32) -> cart_item::Model {
        cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: name.into(),
            image: None,
            quantity,
            unit_price,
            weight_grams: weight,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn metadata_for(selected: Vec<Uuid>) -> CheckoutMetadata {
        CheckoutMetadata {
            user_id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            total: 220_000,
            shipping_fee: 20_000,
            selected_items: selected,
        }
    }

    #[test]
    fn metadata_map_round_trip() {
        let metadata = metadata_for(vec![Uuid::new_v4(), Uuid::new_v4()]);
        let parsed = CheckoutMetadata::from_map(&metadata.to_map()).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn metadata_with_no_selection_round_trips() {
        let metadata = metadata_for(vec![]);
        let parsed = CheckoutMetadata::from_map(&metadata.to_map()).unwrap();
        assert!(parsed.selected_items.is_empty());
    }

    #[test]
    fn metadata_missing_field_is_rejected() {
        let metadata = metadata_for(vec![]);
        let mut map = metadata.to_map();
        map.remove("cart_id");
        assert!(CheckoutMetadata::from_map(&map).is_err());
    }

    #[test]
    fn metadata_bad_uuid_is_rejected() {
        let metadata = metadata_for(vec![]);
        let mut map = metadata.to_map();
        map.insert("order_id".into(), "not-a-uuid".into());
        assert!(CheckoutMetadata::from_map(&map).is_err());
    }

    #[test]
    fn reconcile_selects_by_cart_item_id() {
        let wanted = cart_line("Royal Canin 1kg", 2, 100_000, 1000);
        let unwanted = cart_line("Cat litter 5kg", 1, 50_000, 5000);
        let metadata = metadata_for(vec![wanted.id]);

        let lines = reconcile_lines(&[wanted.clone(), unwanted], &metadata, IdScheme::CartItem);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].product_id, wanted.product_id);
        assert_eq!(lines[0].quantity, 2);
        assert_eq!(lines[0].unit_price, 100_000);
    }

    #[test]
    fn reconcile_selects_by_product_id_for_legacy_payloads() {
        let wanted = cart_line("Dog leash", 1, 80_000, 0);
        let metadata = metadata_for(vec![wanted.product_id]);

        assert!(reconcile_lines(std::slice::from_ref(&wanted), &metadata, IdScheme::CartItem).is_empty());
        let lines = reconcile_lines(&[wanted], &metadata, IdScheme::Product);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn reconcile_with_empty_selection_yields_nothing() {
        let item = cart_line("Bird seed", 3, 30_000, 500);
        let metadata = metadata_for(vec![]);
        assert!(reconcile_lines(&[item], &metadata, IdScheme::CartItem).is_empty());
    }
}
