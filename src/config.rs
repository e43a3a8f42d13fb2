use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key (minimum 32 characters)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// JWT expiration time in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: usize,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to create missing tables on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    // ========== Card gateway (hosted checkout sessions) ==========
    /// Base URL of the session-based card gateway API
    #[serde(default = "default_card_gateway_url")]
    pub card_gateway_url: String,

    /// API secret for the card gateway
    #[serde(default)]
    pub card_gateway_secret: String,

    /// Secret for verifying card gateway webhook signatures
    #[serde(default)]
    pub card_webhook_secret: String,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub card_webhook_tolerance_secs: u64,

    /// Where the gateway sends the shopper after a completed session
    #[serde(default = "default_checkout_success_url")]
    pub checkout_success_url: String,

    /// Where the gateway sends the shopper after an abandoned session
    #[serde(default = "default_checkout_cancel_url")]
    pub checkout_cancel_url: String,

    /// Minimum order total (VND) accepted by the card gateway
    #[serde(default = "default_card_minimum_total")]
    pub card_minimum_total: i64,

    // ========== Redirect gateway (signed-URL local gateway) ==========
    /// Payment page URL of the redirect gateway
    #[serde(default = "default_redirect_gateway_url")]
    pub redirect_gateway_url: String,

    /// Merchant code issued by the redirect gateway
    #[serde(default)]
    pub redirect_merchant_code: String,

    /// HMAC-SHA512 secret for signing redirect parameters
    #[serde(default)]
    pub redirect_hash_secret: String,

    /// Return URL the gateway redirects back to
    #[serde(default = "default_redirect_return_url")]
    pub redirect_return_url: String,

    /// Minimum order total (VND) accepted by the redirect gateway
    #[serde(default)]
    pub redirect_minimum_total: i64,

    /// Remove purchased items from the cart before redirecting instead of
    /// after the verified success return. Loses the selection when the
    /// shopper abandons the payment page; off unless a deployment needs the
    /// legacy behavior.
    #[serde(default)]
    pub redirect_eager_cart_removal: bool,

    // ========== Carrier ==========
    /// Base URL of the shipping carrier API
    #[serde(default = "default_carrier_api_url")]
    pub carrier_api_url: String,

    /// Access token for the carrier API
    #[serde(default)]
    pub carrier_api_token: String,

    // ========== Mail relay ==========
    /// HTTP mail relay endpoint; invoice emails are skipped when unset
    #[serde(default)]
    pub mail_relay_url: Option<String>,

    /// From address for outgoing mail
    #[serde(default = "default_mail_from")]
    pub mail_from: String,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything beyond the
    /// core connection settings. Used by tests and tooling.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            card_gateway_url: default_card_gateway_url(),
            card_gateway_secret: String::new(),
            card_webhook_secret: String::new(),
            card_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            checkout_success_url: default_checkout_success_url(),
            checkout_cancel_url: default_checkout_cancel_url(),
            card_minimum_total: default_card_minimum_total(),
            redirect_gateway_url: default_redirect_gateway_url(),
            redirect_merchant_code: String::new(),
            redirect_hash_secret: String::new(),
            redirect_return_url: default_redirect_return_url(),
            redirect_minimum_total: 0,
            redirect_eager_cart_removal: false,
            carrier_api_url: default_carrier_api_url(),
            carrier_api_token: String::new(),
            mail_relay_url: None,
            mail_from: default_mail_from(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Minimum accepted order total for a payment method
    pub fn minimum_total_for(&self, method: crate::entities::order::PaymentMethod) -> i64 {
        use crate::entities::order::PaymentMethod;
        match method {
            PaymentMethod::CashOnDelivery => 0,
            PaymentMethod::CardSession => self.card_minimum_total,
            PaymentMethod::Redirect => self.redirect_minimum_total,
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationError> {
        if !self.is_development() && self.jwt_secret.trim().len() < 32 {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some(
                "JWT secret must be a unique, secure value outside development. Set APP__JWT_SECRET."
                    .into(),
            );
            return Err(err);
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_jwt_expiration() -> usize {
    3600
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

fn default_card_gateway_url() -> String {
    "https://api.cardgateway.example".to_string()
}

fn default_checkout_success_url() -> String {
    "http://localhost:3000/checkout/success".to_string()
}

fn default_checkout_cancel_url() -> String {
    "http://localhost:3000/cart".to_string()
}

fn default_card_minimum_total() -> i64 {
    50_000
}

fn default_redirect_gateway_url() -> String {
    "https://sandbox.localpay.example/paymentv2/vpcpay.html".to_string()
}

fn default_redirect_return_url() -> String {
    "http://localhost:3000/checkout/redirect-return".to_string()
}

fn default_carrier_api_url() -> String {
    "https://api.carrier.example".to_string()
}

fn default_mail_from() -> String {
    "orders@petstore.example".to_string()
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("petstore_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default: it must come from a config file or env var.
    let config = Config::builder()
        .set_default("database_url", "sqlite://petstore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET with a secure random string.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e.to_string())
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e.to_string())
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::PaymentMethod;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "super_secure_jwt_secret_that_is_long_enough_123".into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn card_floor_defaults_to_fifty_thousand() {
        let cfg = base_config();
        assert_eq!(cfg.minimum_total_for(PaymentMethod::CardSession), 50_000);
        assert_eq!(cfg.minimum_total_for(PaymentMethod::Redirect), 0);
        assert_eq!(cfg.minimum_total_for(PaymentMethod::CashOnDelivery), 0);
    }

    #[test]
    fn production_rejects_short_jwt_secret() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        cfg.jwt_secret = "short".into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn redirect_cart_removal_is_deferred_by_default() {
        assert!(!base_config().redirect_eager_cart_removal);
    }
}
