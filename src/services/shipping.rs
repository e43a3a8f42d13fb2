use serde_json::{json, Value};
use tracing::{error, instrument};

use crate::errors::ServiceError;

/// Thin authenticated client for the shipping carrier's API. Payloads pass
/// through untouched; the carrier owns their schema.
#[derive(Clone)]
pub struct CarrierClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl CarrierClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    /// Registers a shipment for a confirmed order.
    #[instrument(skip(self, payload))]
    pub async fn create_shipment(&self, payload: Value) -> Result<Value, ServiceError> {
        self.post("/v2/shipping-order/create", payload).await
    }

    /// Current carrier status for a shipment code.
    #[instrument(skip(self))]
    pub async fn shipment_status(&self, order_code: &str) -> Result<Value, ServiceError> {
        self.post("/v2/shipping-order/detail", json!({ "order_code": order_code }))
            .await
    }

    /// Delivery lead-time estimate for a destination.
    #[instrument(skip(self, payload))]
    pub async fn estimate_leadtime(&self, payload: Value) -> Result<Value, ServiceError> {
        self.post("/v2/shipping-order/leadtime", payload).await
    }

    async fn post(&self, path: &str, payload: Value) -> Result<Value, ServiceError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Token", &self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, %path, "carrier unreachable");
                ServiceError::ExternalServiceError(format!("carrier: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!(%status, %detail, %path, "carrier request failed");
            return Err(ServiceError::ExternalServiceError(format!(
                "carrier returned {}",
                status
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("carrier response: {}", e)))
    }
}
