mod common;

use common::{add_line, customer, manager, setup, staff, TestApp};
use petstore_api::auth::AuthUser;
use petstore_api::entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus};
use petstore_api::errors::ServiceError;
use petstore_api::services::checkout::CheckoutRequest;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use std::sync::atomic::Ordering;
use uuid::Uuid;

/// COD order for two bags of food plus shipping: total 220_000.
async fn cod_order(app: &TestApp, user: &AuthUser) -> Uuid {
    let view = add_line(app, user, "Royal Canin 1kg", 2, 100_000, 1000).await;
    let outcome = app
        .services
        .checkout
        .checkout(
            user,
            CheckoutRequest {
                payment_method: PaymentMethod::CashOnDelivery,
                selected_items: vec![view.items[0].id],
                shipping_method: "GHN".into(),
                shipping_fee: 20_000,
                address: Some("12 Nguyen Trai, Ha Noi".into()),
                phone: None,
            },
            "127.0.0.1",
        )
        .await
        .unwrap();
    outcome.order_id
}

/// Card order whose session already carries a payment intent.
async fn card_order(app: &TestApp, user: &AuthUser) -> Uuid {
    let view = add_line(app, user, "Dog bed", 1, 300_000, 2000).await;
    let outcome = app
        .services
        .checkout
        .checkout(
            user,
            CheckoutRequest {
                payment_method: PaymentMethod::CardSession,
                selected_items: vec![view.items[0].id],
                shipping_method: "GHN".into(),
                shipping_fee: 0,
                address: Some("12 Nguyen Trai, Ha Noi".into()),
                phone: None,
            },
            "127.0.0.1",
        )
        .await
        .unwrap();
    outcome.order_id
}

#[tokio::test]
async fn staff_updates_append_one_audit_record_each() {
    let app = setup().await;
    let user = customer("lan");
    let clerk = staff();
    let order_id = cod_order(&app, &user).await;

    app.services
        .orders
        .update_status(&clerk, order_id, OrderStatus::Processing, None)
        .await
        .unwrap();
    app.services
        .orders
        .update_status(&clerk, order_id, OrderStatus::HandedToCarrier, None)
        .await
        .unwrap();

    let trail = app.services.orders.list_interactions(order_id).await.unwrap();
    assert_eq!(trail.len(), 2);
    assert_eq!(trail[0].action, "status:pending->processing");
    assert_eq!(trail[1].action, "status:processing->handed_to_carrier");
    assert!(trail.iter().all(|i| i.staff_id == clerk.user_id));
}

#[tokio::test]
async fn invalid_transition_is_rejected_without_audit() {
    let app = setup().await;
    let user = customer("minh");
    let clerk = staff();
    let order_id = cod_order(&app, &user).await;

    let err = app
        .services
        .orders
        .update_status(&clerk, order_id, OrderStatus::Delivered, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatusTransition { .. }));

    let trail = app.services.orders.list_interactions(order_id).await.unwrap();
    assert!(trail.is_empty());
}

#[tokio::test]
async fn rejecting_requires_a_reason() {
    let app = setup().await;
    let user = customer("thu");
    let clerk = staff();
    let order_id = cod_order(&app, &user).await;

    let err = app
        .services
        .orders
        .update_status(&clerk, order_id, OrderStatus::Rejected, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));

    let updated = app
        .services
        .orders
        .update_status(
            &clerk,
            order_id,
            OrderStatus::Rejected,
            Some("Out of stock".into()),
        )
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Rejected);
    assert_eq!(updated.refund_reason.as_deref(), Some("Out of stock"));
}

#[tokio::test]
async fn cod_collection_updates_payment_status_with_audit() {
    let app = setup().await;
    let user = customer("huy");
    let clerk = staff();
    let order_id = cod_order(&app, &user).await;

    let updated = app
        .services
        .orders
        .update_payment_status(&clerk, order_id, PaymentStatus::Received)
        .await
        .unwrap();
    assert_eq!(updated.payment_status, PaymentStatus::Received);

    // Same status again is a no-op, no second audit row.
    app.services
        .orders
        .update_payment_status(&clerk, order_id, PaymentStatus::Received)
        .await
        .unwrap();

    let trail = app.services.orders.list_interactions(order_id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "payment_status:unpaid->received");
}

#[tokio::test]
async fn payment_status_updates_are_limited_to_cod_settlement() {
    let app = setup().await;
    let clerk = staff();

    // A card order waits on the gateway; staff cannot mark it received.
    let card_user = customer("ngoc");
    let card_id = card_order(&app, &card_user).await;
    let err = app
        .services
        .orders
        .update_payment_status(&clerk, card_id, PaymentStatus::Received)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatusTransition { .. }));

    // A settled COD order cannot be walked back to unpaid.
    let cod_user = customer("ha");
    let cod_id = cod_order(&app, &cod_user).await;
    app.services
        .orders
        .update_payment_status(&clerk, cod_id, PaymentStatus::Received)
        .await
        .unwrap();
    let err = app
        .services
        .orders
        .update_payment_status(&clerk, cod_id, PaymentStatus::Unpaid)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStatusTransition { .. }));

    // Only the successful settlement left an audit row.
    let trail = app.services.orders.list_interactions(card_id).await.unwrap();
    assert!(trail.is_empty());
    let trail = app.services.orders.list_interactions(cod_id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "payment_status:unpaid->received");
}

#[tokio::test]
async fn customer_confirms_receipt_from_delivered_or_in_transit() {
    let app = setup().await;
    let user = customer("an");
    let clerk = staff();
    let order_id = cod_order(&app, &user).await;

    for status in [
        OrderStatus::Processing,
        OrderStatus::HandedToCarrier,
        OrderStatus::InTransit,
    ] {
        app.services
            .orders
            .update_status(&clerk, order_id, status, None)
            .await
            .unwrap();
    }

    let updated = app
        .services
        .orders
        .confirm_received(&user, order_id)
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Received);
}

#[tokio::test]
async fn confirming_receipt_too_early_is_rejected() {
    let app = setup().await;
    let user = customer("vy");
    let clerk = staff();
    let order_id = cod_order(&app, &user).await;

    app.services
        .orders
        .update_status(&clerk, order_id, OrderStatus::Processing, None)
        .await
        .unwrap();

    let err = app
        .services
        .orders
        .confirm_received(&user, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn other_customers_cannot_touch_the_order() {
    let app = setup().await;
    let user = customer("quan");
    let stranger = customer("trang");
    let order_id = cod_order(&app, &user).await;

    let err = app
        .services
        .orders
        .get_order(&stranger, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = app
        .services
        .orders
        .request_refund(&stranger, order_id, "not mine".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn refund_request_recomputes_a_tampered_total() {
    let app = setup().await;
    let user = customer("lan");
    let order_id = cod_order(&app, &user).await;

    let model = order::Entity::find_by_id(order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    let mut active: order::ActiveModel = model.into();
    active.total = Set(1);
    active.update(&*app.db).await.unwrap();

    let updated = app
        .services
        .orders
        .request_refund(&user, order_id, "Wrong size".into())
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::RefundRequested);
    assert_eq!(updated.refund_reason.as_deref(), Some("Wrong size"));
    assert_eq!(updated.total, 220_000);
}

#[tokio::test]
async fn manager_approves_refund_through_the_gateway() {
    let app = setup().await;
    let user = customer("minh");
    let boss = manager();
    let order_id = card_order(&app, &user).await;

    app.services
        .orders
        .request_refund(&user, order_id, "Changed my mind".into())
        .await
        .unwrap();

    let updated = app
        .services
        .orders
        .approve_refund(&boss, order_id)
        .await
        .unwrap();
    assert_eq!(updated.status, OrderStatus::Refunded);
    assert_eq!(updated.payment_status, PaymentStatus::Refunded);
    assert_eq!(updated.total, 0);
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 1);

    let trail = app.services.orders.list_interactions(order_id).await.unwrap();
    assert!(trail
        .iter()
        .any(|i| i.action == "refund_approved:re_test_1"));
}

#[tokio::test]
async fn refund_approval_requires_a_pending_request() {
    let app = setup().await;
    let user = customer("thu");
    let boss = manager();
    let order_id = card_order(&app, &user).await;

    let err = app
        .services
        .orders
        .approve_refund(&boss, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cod_orders_have_no_gateway_payment_to_refund() {
    let app = setup().await;
    let user = customer("huy");
    let boss = manager();
    let order_id = cod_order(&app, &user).await;

    app.services
        .orders
        .request_refund(&user, order_id, "Damaged bag".into())
        .await
        .unwrap();

    let err = app
        .services
        .orders
        .approve_refund(&boss, order_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
    assert_eq!(app.gateway.refund_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn customers_list_only_their_own_orders() {
    let app = setup().await;
    let user = customer("an");
    let other = customer("vy");
    let first = cod_order(&app, &user).await;
    let second = cod_order(&app, &user).await;
    cod_order(&app, &other).await;

    let (orders, total) = app.services.orders.list_orders(&user, 0, 10).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o.user_id == user.user_id));
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    assert!(ids.contains(&first) && ids.contains(&second));
}
