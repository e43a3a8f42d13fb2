use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::{
    entities::{order, order_item},
    errors::ServiceError,
};

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError>;
}

/// Mailer posting to an HTTP mail relay. When no relay is configured the
/// send is skipped with a warning, which keeps development setups working.
#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn new(relay_url: Option<String>, from: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url,
            from,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError> {
        let Some(relay_url) = &self.relay_url else {
            warn!(%to, "mail relay not configured, skipping email");
            return Ok(());
        };

        let response = self
            .client
            .post(relay_url)
            .json(&json!({
                "from": self.from,
                "to": to,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("mail relay: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "mail relay returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Invoice and order notifications.
#[derive(Clone)]
pub struct NotificationService {
    mailer: Arc<dyn Mailer>,
}

impl NotificationService {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Sends the order invoice without blocking the caller. Delivery
    /// failures are logged, never surfaced to the shopper.
    #[instrument(skip(self, order, items), fields(order_id = %order.id))]
    pub fn send_invoice_detached(&self, order: order::Model, items: Vec<order_item::Model>) {
        let mailer = Arc::clone(&self.mailer);
        tokio::spawn(async move {
            let subject = format!("Your PetStore order {}", order.id);
            let body = render_invoice(&order, &items);
            match mailer.send(&order.email, &subject, &body).await {
                Ok(()) => info!(order_id = %order.id, "invoice email sent"),
                Err(e) => error!(order_id = %order.id, error = %e, "invoice email failed"),
            }
        });
    }
}

/// Renders the plain-text invoice body.
fn render_invoice(order: &order::Model, items: &[order_item::Model]) -> String {
    let mut body = String::new();
    body.push_str(&format!("Order {}\n", order.id));
    body.push_str(&format!("Placed: {}\n", order.created_at.format("%Y-%m-%d %H:%M")));
    body.push_str(&format!("Hello {},\n\n", order.username));
    body.push_str("Your order has been placed:\n\n");
    for item in items {
        body.push_str(&format!(
            "  {} x{} @ {} VND = {} VND\n",
            item.product_name,
            item.quantity,
            item.unit_price,
            item.line_total()
        ));
    }
    body.push_str(&format!("\nShipping fee: {} VND\n", order.shipping_fee));
    body.push_str(&format!("Total: {} VND\n", order.total));
    body.push_str("\nPlease sign in to PetStore to confirm receipt once your order arrives.\n");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn invoice_lists_lines_and_totals() {
        let order_id = Uuid::new_v4();
        let order = order::Model {
            id: order_id,
            user_id: Uuid::new_v4(),
            username: "An".into(),
            email: "an@example.com".into(),
            address: "12 Nguyen Trai".into(),
            phone: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            payment_method: PaymentMethod::CashOnDelivery,
            shipping_method: "GHN".into(),
            shipping_fee: 20_000,
            total: 220_000,
            payment_intent_id: String::new(),
            gateway_session_id: String::new(),
            refund_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let items = vec![order_item::Model {
            id: Uuid::new_v4(),
            order_id,
            product_id: Uuid::new_v4(),
            product_name: "Royal Canin 1kg".into(),
            image: None,
            quantity: 2,
            unit_price: 100_000,
            weight_grams: 1000,
            created_at: Utc::now(),
        }];

        let body = render_invoice(&order, &items);
        assert!(body.contains("Royal Canin 1kg x2 @ 100000 VND = 200000 VND"));
        assert!(body.contains("Shipping fee: 20000 VND"));
        assert!(body.contains("Total: 220000 VND"));
    }
}
