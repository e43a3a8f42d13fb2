use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::services::reconciliation::CheckoutMetadata;

pub mod card;
pub mod redirect;

pub use card::HttpCardGateway;
pub use redirect::RedirectGateway;

/// One display line sent to the hosted checkout page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    /// Unit amount in VND
    pub amount: i64,
    pub quantity: i32,
}

/// Request for a hosted checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: CheckoutMetadata,
}

/// A hosted checkout session returned by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

/// Result of a refund request.
#[derive(Debug, Clone, Deserialize)]
pub struct RefundReceipt {
    pub id: String,
    pub status: String,
}

/// Outbound operations against the session-based card gateway.
///
/// The production implementation is [`HttpCardGateway`]; tests substitute
/// their own.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    async fn create_refund(&self, payment_intent_id: &str) -> Result<RefundReceipt, ServiceError>;
}
