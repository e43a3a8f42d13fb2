use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha512;
use std::collections::{BTreeMap, HashMap};

use crate::errors::ServiceError;

type HmacSha512 = Hmac<Sha512>;

/// Parameter carrying the signature on redirect URLs and returns.
pub const SIGNATURE_PARAM: &str = "secure_hash";

/// Response code the gateway sends on a successful payment.
pub const RESPONSE_CODE_SUCCESS: &str = "00";

/// Client for the signed-redirect local payment gateway.
///
/// The gateway has no API to call: the shopper is sent to `pay_url` with a
/// signed query string, and the gateway redirects back with signed result
/// parameters. Signing is HMAC-SHA512 over the form-encoded parameters
/// sorted lexicographically by encoded key.
#[derive(Clone)]
pub struct RedirectGateway {
    pay_url: String,
    merchant_code: String,
    hash_secret: String,
    return_url: String,
}

impl RedirectGateway {
    pub fn new(
        pay_url: String,
        merchant_code: String,
        hash_secret: String,
        return_url: String,
    ) -> Self {
        Self {
            pay_url,
            merchant_code,
            hash_secret,
            return_url,
        }
    }

    /// Builds the signed payment-page URL for an order.
    ///
    /// The wire amount is the VND total multiplied by 100, per the gateway's
    /// convention.
    pub fn build_payment_url(
        &self,
        txn_ref: &str,
        total: i64,
        order_info: &str,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> String {
        let mut params = HashMap::new();
        params.insert("version".to_string(), "2.1.0".to_string());
        params.insert("command".to_string(), "pay".to_string());
        params.insert("merchant_code".to_string(), self.merchant_code.clone());
        params.insert("amount".to_string(), (total * 100).to_string());
        params.insert("currency".to_string(), "VND".to_string());
        params.insert("txn_ref".to_string(), txn_ref.to_string());
        params.insert("order_info".to_string(), order_info.to_string());
        params.insert("order_type".to_string(), "other".to_string());
        params.insert("locale".to_string(), "vn".to_string());
        params.insert("return_url".to_string(), self.return_url.clone());
        params.insert("ip_addr".to_string(), client_ip.to_string());
        params.insert(
            "create_date".to_string(),
            now.format("%Y%m%d%H%M%S").to_string(),
        );

        let payload = signature_payload(&params);
        let signature = self.sign(&payload);
        format!("{}?{}&{}={}", self.pay_url, payload, SIGNATURE_PARAM, signature)
    }

    /// Verifies the signature on return parameters. All parameters except
    /// the signature itself are part of the signed payload.
    pub fn verify_return(&self, params: &HashMap<String, String>) -> Result<(), ServiceError> {
        let provided = params
            .get(SIGNATURE_PARAM)
            .ok_or(ServiceError::InvalidSignature)?;

        let mut unsigned: HashMap<String, String> = params.clone();
        unsigned.remove(SIGNATURE_PARAM);

        let expected = self.sign(&signature_payload(&unsigned));
        if constant_time_eq(expected.as_bytes(), provided.to_lowercase().as_bytes()) {
            Ok(())
        } else {
            Err(ServiceError::InvalidSignature)
        }
    }

    /// Signs a parameter set in place, replacing any existing signature.
    pub fn sign_params(&self, params: &mut HashMap<String, String>) {
        params.remove(SIGNATURE_PARAM);
        let signature = self.sign(&signature_payload(params));
        params.insert(SIGNATURE_PARAM.to_string(), signature);
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(self.hash_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Form-encodes a value: percent-encoding with spaces as `+`.
fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Builds the canonical signing payload: parameters form-encoded, sorted
/// lexicographically by encoded key, joined as a query string.
fn signature_payload(params: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (encode(k), encode(v)))
        .collect();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Mints a short transaction reference from the current time plus random
/// digits. Stored on the order as its gateway correlation id.
pub fn mint_txn_ref(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("{}{:04}", now.format("%d%H%M%S"), suffix)
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
