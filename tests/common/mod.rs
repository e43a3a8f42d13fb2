#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use petstore_api::{
    auth::{AuthUser, ROLE_MANAGER, ROLE_SALES_STAFF},
    config::AppConfig,
    db::{self, DbPool},
    errors::ServiceError,
    events::{process_events, EventSender},
    handlers::AppServices,
    services::carts::{CartView, NewCartItem},
    services::payments::{
        CreateSessionRequest, GatewaySession, PaymentGateway, RefundReceipt,
    },
};

pub const TEST_JWT_SECRET: &str = "integration_test_jwt_secret_that_is_long_enough_123";

/// Card gateway double: hands out a fixed session and counts refunds.
#[derive(Default)]
pub struct MockGateway {
    pub session_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout_session(
        &self,
        _request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewaySession {
            id: "cs_test_1".to_string(),
            url: "https://gateway.test/pay/cs_test_1".to_string(),
            payment_intent: Some("pi_test_1".to_string()),
        })
    }

    async fn create_refund(&self, _payment_intent_id: &str) -> Result<RefundReceipt, ServiceError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefundReceipt {
            id: "re_test_1".to_string(),
            status: "succeeded".to_string(),
        })
    }
}

pub struct TestApp {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
    pub gateway: Arc<MockGateway>,
}

/// Fresh in-memory database and service stack per test.
pub async fn setup() -> TestApp {
    setup_with(|_| {}).await
}

/// Like [`setup`], with a hook to tweak the config before the stack is built.
pub async fn setup_with(customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    let mut config = AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_JWT_SECRET.to_string(),
        3600,
        "127.0.0.1".to_string(),
        0,
        "development".to_string(),
    );
    // A single connection keeps every query on the same in-memory database.
    config.db_max_connections = 1;
    config.db_min_connections = 1;
    config.card_webhook_secret = "whsec_test".to_string();
    config.redirect_merchant_code = "PETSTORE1".to_string();
    config.redirect_hash_secret = "test_redirect_hash_secret".to_string();
    customize(&mut config);
    let config = Arc::new(config);

    let db = Arc::new(db::establish_connection(&config).await.expect("connect"));
    db::ensure_schema(&db).await.expect("schema");

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(process_events(rx));
    let event_sender = Arc::new(EventSender::new(tx));

    let gateway = Arc::new(MockGateway::default());
    let services = AppServices::with_gateway(
        db.clone(),
        config.clone(),
        event_sender,
        gateway.clone(),
    );

    TestApp {
        db,
        config,
        services,
        gateway,
    }
}

pub fn customer(name: &str) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        username: name.to_string(),
        email: format!("{}@example.com", name),
        roles: vec![],
    }
}

pub fn staff() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        username: "staff".to_string(),
        email: "staff@petstore.example".to_string(),
        roles: vec![ROLE_SALES_STAFF.to_string()],
    }
}

pub fn manager() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        username: "manager".to_string(),
        email: "manager@petstore.example".to_string(),
        roles: vec![ROLE_MANAGER.to_string()],
    }
}

/// Adds a line to the user's cart and returns the refreshed view.
pub async fn add_line(
    app: &TestApp,
    user: &AuthUser,
    name: &str,
    quantity: i32,
    unit_price: i64,
    weight_grams: i32,
) -> CartView {
    app.services
        .carts
        .add_item(
            user.user_id,
            NewCartItem {
                product_id: Uuid::new_v4(),
                product_name: name.to_string(),
                image: None,
                quantity,
                unit_price,
                weight_grams,
            },
        )
        .await
        .expect("add_item")
}
