use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        carts::CartService,
        checkout::CheckoutService,
        notifications::{HttpMailer, NotificationService},
        orders::OrderService,
        payments::{HttpCardGateway, PaymentGateway, RedirectGateway},
        reconciliation::PaymentConfirmationService,
        shipping::CarrierClient,
    },
};

pub mod carts;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod payment_webhooks;
pub mod shipping;
pub mod staff_orders;

/// Service container shared through the application state.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub payment_confirmation: Arc<PaymentConfirmationService>,
    pub carrier: Arc<CarrierClient>,
}

impl AppServices {
    /// Wires the services against the production card gateway.
    pub fn new(db: Arc<DbPool>, config: Arc<AppConfig>, event_sender: Arc<EventSender>) -> Self {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpCardGateway::new(
            config.card_gateway_url.clone(),
            config.card_gateway_secret.clone(),
        ));
        Self::with_gateway(db, config, event_sender, gateway)
    }

    /// Wires the services with a caller-provided card gateway. Tests use
    /// this to substitute a mock.
    pub fn with_gateway(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let redirect = RedirectGateway::new(
            config.redirect_gateway_url.clone(),
            config.redirect_merchant_code.clone(),
            config.redirect_hash_secret.clone(),
            config.redirect_return_url.clone(),
        );
        let notifications = NotificationService::new(Arc::new(HttpMailer::new(
            config.mail_relay_url.clone(),
            config.mail_from.clone(),
        )));

        let carts = Arc::new(CartService::new(db.clone(), event_sender.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            config.clone(),
            event_sender.clone(),
            gateway.clone(),
            redirect.clone(),
            notifications.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            gateway,
        ));
        let payment_confirmation = Arc::new(PaymentConfirmationService::new(
            db,
            config.clone(),
            event_sender,
            notifications,
            redirect,
        ));
        let carrier = Arc::new(CarrierClient::new(
            config.carrier_api_url.clone(),
            config.carrier_api_token.clone(),
        ));

        Self {
            carts,
            checkout,
            orders,
            payment_confirmation,
            carrier,
        }
    }
}
