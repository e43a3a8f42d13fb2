mod common;

use common::{add_line, customer, setup, TestApp};
use petstore_api::auth::AuthUser;
use petstore_api::entities::order::{self, OrderStatus, PaymentMethod, PaymentStatus};
use petstore_api::errors::ServiceError;
use petstore_api::services::checkout::{CheckoutOutcome, CheckoutRequest, PaymentInstruction};
use petstore_api::services::payments::RedirectGateway;
use sea_orm::{EntityTrait, PaginatorTrait};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn request(
    payment_method: PaymentMethod,
    selected_items: Vec<Uuid>,
    shipping_fee: i64,
) -> CheckoutRequest {
    CheckoutRequest {
        payment_method,
        selected_items,
        shipping_method: "GHN".into(),
        shipping_fee,
        address: Some("12 Nguyen Trai, Ha Noi".into()),
        phone: Some("0901234567".into()),
    }
}

async fn checkout(
    app: &TestApp,
    user: &AuthUser,
    payment_method: PaymentMethod,
    selected_items: Vec<Uuid>,
    shipping_fee: i64,
) -> Result<CheckoutOutcome, ServiceError> {
    app.services
        .checkout
        .checkout(user, request(payment_method, selected_items, shipping_fee), "127.0.0.1")
        .await
}

#[tokio::test]
async fn cod_checkout_takes_selected_items_and_leaves_the_rest() {
    let app = setup().await;
    let user = customer("lan");

    add_line(&app, &user, "Royal Canin 1kg", 2, 100_000, 1000).await;
    let view = add_line(&app, &user, "Cat litter 5kg", 1, 50_000, 5000).await;
    let food = view
        .items
        .iter()
        .find(|i| i.product_name == "Royal Canin 1kg")
        .unwrap()
        .clone();

    let outcome = checkout(
        &app,
        &user,
        PaymentMethod::CashOnDelivery,
        vec![food.id],
        20_000,
    )
    .await
    .unwrap();

    assert_eq!(outcome.total, 220_000);
    assert!(matches!(outcome.payment, PaymentInstruction::None));

    let order_view = app
        .services
        .orders
        .get_order(&user, outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order_view.order.status, OrderStatus::Pending);
    assert_eq!(order_view.order.payment_status, PaymentStatus::Unpaid);
    assert_eq!(order_view.order.total, 220_000);
    assert_eq!(order_view.items.len(), 1);
    assert_eq!(order_view.items[0].product_id, food.product_id);
    assert_eq!(order_view.items[0].quantity, 2);

    // Only the purchased line left the cart.
    let view = app.services.carts.get_cart(user.user_id).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].product_name, "Cat litter 5kg");
    assert_eq!(view.cart.total_price, 50_000);
}

#[tokio::test]
async fn card_checkout_below_minimum_creates_no_order() {
    let app = setup().await;
    let user = customer("minh");

    let view = add_line(&app, &user, "Catnip toy", 1, 15_000, 50).await;
    let line_id = view.items[0].id;

    let err = checkout(&app, &user, PaymentMethod::CardSession, vec![line_id], 0)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::PaymentAmountTooLow {
            total: 15_000,
            minimum: 50_000,
        }
    ));

    assert_eq!(order::Entity::find().count(&*app.db).await.unwrap(), 0);
    assert_eq!(app.gateway.session_calls.load(Ordering::SeqCst), 0);

    let view = app.services.carts.get_cart(user.user_id).await.unwrap();
    assert_eq!(view.items.len(), 1);
}

#[tokio::test]
async fn card_checkout_opens_session_and_keeps_the_cart() {
    let app = setup().await;
    let user = customer("thu");

    let view = add_line(&app, &user, "Dog bed", 1, 300_000, 2000).await;
    let line_id = view.items[0].id;

    let outcome = checkout(&app, &user, PaymentMethod::CardSession, vec![line_id], 20_000)
        .await
        .unwrap();

    assert_eq!(outcome.total, 320_000);
    match &outcome.payment {
        PaymentInstruction::CheckoutSession { session_id, url } => {
            assert_eq!(session_id, "cs_test_1");
            assert!(url.contains("cs_test_1"));
        }
        other => panic!("expected checkout session, got {:?}", other),
    }
    assert_eq!(app.gateway.session_calls.load(Ordering::SeqCst), 1);

    let order_view = app
        .services
        .orders
        .get_order(&user, outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order_view.order.status, OrderStatus::Pending);
    assert_eq!(order_view.order.payment_status, PaymentStatus::Pending);
    assert_eq!(order_view.order.gateway_session_id, "cs_test_1");
    assert_eq!(order_view.order.payment_intent_id, "pi_test_1");

    // The webhook removes purchased items, not checkout.
    let view = app.services.carts.get_cart(user.user_id).await.unwrap();
    assert_eq!(view.items.len(), 1);
}

#[tokio::test]
async fn redirect_checkout_returns_a_verifiable_url() {
    let app = setup().await;
    let user = customer("huy");

    let view = add_line(&app, &user, "Aquarium 60cm", 1, 450_000, 8000).await;
    let line_id = view.items[0].id;

    let outcome = checkout(&app, &user, PaymentMethod::Redirect, vec![line_id], 30_000)
        .await
        .unwrap();
    assert_eq!(outcome.total, 480_000);

    let url = match &outcome.payment {
        PaymentInstruction::RedirectTo { url } => url.clone(),
        other => panic!("expected redirect, got {:?}", other),
    };

    let query = url.split_once('?').unwrap().1;
    let params: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let gateway = RedirectGateway::new(
        app.config.redirect_gateway_url.clone(),
        app.config.redirect_merchant_code.clone(),
        app.config.redirect_hash_secret.clone(),
        app.config.redirect_return_url.clone(),
    );
    assert!(gateway.verify_return(&params).is_ok());
    // Wire amount is VND x 100.
    assert_eq!(params.get("amount").unwrap(), "48000000");

    let order_view = app
        .services
        .orders
        .get_order(&user, outcome.order_id)
        .await
        .unwrap();
    assert_eq!(order_view.order.payment_intent_id.len(), 12);
    assert_eq!(
        params.get("txn_ref").unwrap(),
        &order_view.order.payment_intent_id
    );

    // Removal is deferred until the verified return by default.
    let view = app.services.carts.get_cart(user.user_id).await.unwrap();
    assert_eq!(view.items.len(), 1);
}

#[tokio::test]
async fn checkout_with_empty_cart_is_rejected() {
    let app = setup().await;
    let user = customer("an");
    app.services.carts.get_or_create_cart(user.user_id).await.unwrap();

    let err = checkout(
        &app,
        &user,
        PaymentMethod::CashOnDelivery,
        vec![Uuid::new_v4()],
        0,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperation(_)));
}

#[tokio::test]
async fn checkout_with_unknown_selection_is_rejected() {
    let app = setup().await;
    let user = customer("vy");
    add_line(&app, &user, "Hamster wheel", 1, 60_000, 300).await;

    let err = checkout(
        &app,
        &user,
        PaymentMethod::CashOnDelivery,
        vec![Uuid::new_v4()],
        0,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn checkout_requires_an_address() {
    let app = setup().await;
    let user = customer("quan");
    let view = add_line(&app, &user, "Parrot perch", 1, 90_000, 400).await;

    let mut req = request(PaymentMethod::CashOnDelivery, vec![view.items[0].id], 0);
    req.address = Some("   ".into());
    let err = app
        .services
        .checkout
        .checkout(&user, req, "127.0.0.1")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}
