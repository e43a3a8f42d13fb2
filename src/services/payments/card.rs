use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{error, instrument};

use crate::errors::ServiceError;

use super::{CreateSessionRequest, GatewaySession, PaymentGateway, RefundReceipt};

type HmacSha256 = Hmac<Sha256>;

/// HTTP client for the session-based card gateway.
#[derive(Clone)]
pub struct HttpCardGateway {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

impl HttpCardGateway {
    pub fn new(base_url: String, secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            secret,
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpCardGateway {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let body = json!({
            "mode": "payment",
            "success_url": request.success_url,
            "cancel_url": request.cancel_url,
            "line_items": request.line_items,
            "metadata": request.metadata.to_map(),
        });

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "card gateway unreachable");
                ServiceError::ExternalServiceError(format!("card gateway: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(%status, %detail, "card gateway rejected session");
            return Err(ServiceError::PaymentFailed(format!(
                "gateway rejected checkout session ({})",
                status
            )));
        }

        response.json::<GatewaySession>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("card gateway response: {}", e))
        })
    }

    #[instrument(skip(self))]
    async fn create_refund(&self, payment_intent_id: &str) -> Result<RefundReceipt, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.secret)
            .json(&json!({ "payment_intent": payment_intent_id }))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "card gateway unreachable");
                ServiceError::ExternalServiceError(format!("card gateway: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::PaymentFailed(format!(
                "gateway rejected refund ({})",
                status
            )));
        }

        response.json::<RefundReceipt>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("card gateway response: {}", e))
        })
    }
}

/// Parsed webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

/// The session/charge object embedded in a webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, ServiceError> {
        serde_json::from_slice(body)
            .map_err(|e| ServiceError::ValidationError(format!("Malformed webhook payload: {}", e)))
    }
}

/// Verifies a `t=<unix>,v1=<hex>` signature header over the raw body.
///
/// The signed payload is `"{t}.{body}"`; the timestamp must be within
/// `tolerance_secs` of `now`.
pub fn verify_webhook_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let mut timestamp: Option<i64> = None;
    let mut signature: Option<String> = None;

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = v.parse().ok(),
            (Some("v1"), Some(v)) => signature = Some(v.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(ServiceError::InvalidSignature)?;
    let signature = signature.ok_or(ServiceError::InvalidSignature)?;

    if (now - timestamp).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::InvalidSignature);
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("invalid webhook secret".into()))?;
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        Ok(())
    } else {
        Err(ServiceError::InvalidSignature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
