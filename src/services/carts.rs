use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::{cart, cart_item},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Line item payload for adding to a cart. Prices and names are snapshots
/// provided by the caller; the catalog lives in another service.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewCartItem {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    pub image: Option<String>,
    #[validate(range(min = 1, max = 1000))]
    pub quantity: i32,
    #[validate(range(min = 0))]
    pub unit_price: i64,
    #[validate(range(min = 0))]
    pub weight_grams: i32,
}

/// A cart together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

/// Service for managing shopping carts
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Returns the user's cart, creating an empty one on first use.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        if let Some(existing) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            total_price: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Returns the user's cart with items, or NotFound if none exists.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))?;

        let items = cart.find_related(cart_item::Entity).all(&*self.db).await?;
        Ok(CartView { cart, items })
    }

    /// Adds an item to the user's cart. Lines with the same product and
    /// weight variant merge by summing quantities. The cart total is
    /// recomputed in the same transaction.
    #[instrument(skip(self, item))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        item: NewCartItem,
    ) -> Result<CartView, ServiceError> {
        item.validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let cart = self.get_or_create_cart(user_id).await?;
        let product_id = item.product_id;

        let txn = self.db.begin().await?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(item.product_id))
            .filter(cart_item::Column::WeightGrams.eq(item.weight_grams))
            .one(&txn)
            .await?;

        let now = Utc::now();
        match existing {
            Some(line) => {
                let quantity = line.quantity + item.quantity;
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(quantity);
                active.unit_price = Set(item.unit_price);
                active.updated_at = Set(now);
                active.update(&txn).await?;
            }
            None => {
                let line = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(item.product_id),
                    product_name: Set(item.product_name),
                    image: Set(item.image),
                    quantity: Set(item.quantity),
                    unit_price: Set(item.unit_price),
                    weight_grams: Set(item.weight_grams),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                line.insert(&txn).await?;
            }
        }

        recalculate_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id,
            })
            .await;

        self.get_cart(user_id).await
    }

    /// Sets a line's quantity; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        let cart = self.require_cart(user_id).await?;

        let txn = self.db.begin().await?;

        let line = cart_item::Entity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart item {} not found", item_id)))?;

        if quantity <= 0 {
            line.delete(&txn).await?;
        } else {
            let mut active: cart_item::ActiveModel = line.into();
            active.quantity = Set(quantity);
            active.updated_at = Set(Utc::now());
            active.update(&txn).await?;
        }

        recalculate_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.get_cart(user_id).await
    }

    /// Removes a single line from the cart.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let cart = self.require_cart(user_id).await?;

        let txn = self.db.begin().await?;
        let deleted = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        if deleted.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Cart item {} not found",
                item_id
            )));
        }
        recalculate_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                item_id,
            })
            .await;

        self.get_cart(user_id).await
    }

    /// Empties the cart.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let cart = self.require_cart(user_id).await?;

        let txn = self.db.begin().await?;
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        recalculate_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;
        Ok(())
    }

    /// Number of lines in the cart, for badge displays.
    #[instrument(skip(self))]
    pub async fn item_count(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let cart = self.require_cart(user_id).await?;
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .count(&*self.db)
            .await?)
    }

    async fn require_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart for user {} not found", user_id)))
    }
}

/// Recomputes a cart's total from its lines. Callers run this inside the
/// same transaction as the mutation that invalidated the total.
pub async fn recalculate_cart_total<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<i64, ServiceError> {
    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(conn)
        .await?;

    let total: i64 = items.iter().map(|i| i.line_total()).sum();

    let cart = cart::Entity::find_by_id(cart_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

    let mut active: cart::ActiveModel = cart.into();
    active.total_price = Set(total);
    active.updated_at = Set(Utc::now());
    active.update(conn).await?;

    Ok(total)
}

/// Deletes the given lines from a cart and recomputes the total.
pub async fn remove_cart_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    item_ids: &[Uuid],
) -> Result<(), ServiceError> {
    if item_ids.is_empty() {
        return Ok(());
    }
    cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::Id.is_in(item_ids.iter().copied()))
        .exec(conn)
        .await?;
    recalculate_cart_total(conn, cart_id).await?;
    Ok(())
}

/// Deletes cart lines matching the given (product, weight variant) pairs.
/// Used when finalizing a redirect payment, where the order's snapshot is
/// the only record of what was purchased.
pub async fn remove_matching_products<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    products: &[(Uuid, i32)],
) -> Result<(), ServiceError> {
    if products.is_empty() {
        return Ok(());
    }
    let items = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .all(conn)
        .await?;
    let doomed: Vec<Uuid> = items
        .iter()
        .filter(|i| products.contains(&(i.product_id, i.weight_grams)))
        .map(|i| i.id)
        .collect();
    remove_cart_items(conn, cart_id, &doomed).await
}
