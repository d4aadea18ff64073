use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LOCALE: &str = "en_GB";

/// Connection and behaviour settings for the payment gateway API.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Base endpoint, e.g. https://eu.sandbox.api-gateway.example.com
    #[validate(length(min = 1))]
    pub endpoint: String,

    /// Merchant identifier embedded in every API path
    #[validate(length(min = 1))]
    pub merchant_id: String,

    /// API key id sent in the Authorization scheme
    #[validate(length(min = 1))]
    pub client_id: String,

    /// Shared secret used to sign outbound requests
    #[validate(length(min = 1))]
    pub api_secret: String,

    /// Shared secret for verifying inbound webhook signatures.
    /// Webhooks are rejected outright when this is unset.
    pub webhook_secret: Option<String>,

    /// Secret for signing redirect-return verification tokens
    #[validate(length(min = 16))]
    pub verification_secret: String,

    /// Statement soft descriptor passed on create-payment requests
    #[serde(default)]
    pub soft_descriptor: Option<String>,

    /// Skip 3-D Secure authentication on direct card payments
    #[serde(default)]
    pub skip_authentication: bool,

    /// Request delayed settlement (authorize now, capture after approval)
    #[serde(default)]
    pub requires_approval: bool,

    /// Persist gateway-issued card tokens into the customer wallet
    #[serde(default = "default_true")]
    pub store_tokens: bool,

    /// Append a per-notification entry to the order transaction log
    #[serde(default)]
    pub enable_transaction_log: bool,

    /// Locale used when an order carries none (unattended/API orders)
    #[serde(default = "default_locale")]
    pub default_locale: String,

    /// Outbound request timeout
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// URL the gateway redirects shoppers back to after 3DS/hosted flows
    #[validate(length(min = 1))]
    pub return_url: String,
}

/// Per-status email gating, mirroring the merchant-configurable send flags.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default = "default_from_address")]
    pub from_address: String,

    /// Recipient for fraud-review alerts
    #[serde(default)]
    pub fraud_manager_address: Option<String>,

    #[serde(default)]
    pub send_fraud_manager: bool,
    #[serde(default)]
    pub send_on_fraud_pending: bool,
    #[serde(default)]
    pub send_on_approval_pending: bool,
    #[serde(default)]
    pub send_on_paid: bool,
    #[serde(default)]
    pub send_on_redirected: bool,
    #[serde(default)]
    pub send_on_waiting_payment: bool,
    #[serde(default)]
    pub send_on_rejected: bool,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_env")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_env() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_gateway_timeout() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

fn default_from_address() -> String {
    "no-reply@payconnect.dev".to_string()
}

impl AppConfig {
    /// Minimal constructor used by tests and embedded setups.
    pub fn new(database_url: impl Into<String>, gateway: GatewayConfig) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: 1,
            gateway,
            notifications: NotificationConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl GatewayConfig {
    /// Sandbox defaults with placeholder credentials, for tests.
    pub fn sandbox(merchant_id: impl Into<String>) -> Self {
        Self {
            endpoint: "https://eu.sandbox.api-gateway.example.com".to_string(),
            merchant_id: merchant_id.into(),
            client_id: "test-client".to_string(),
            api_secret: "test-api-secret".to_string(),
            webhook_secret: Some("test-webhook-secret".to_string()),
            verification_secret: "test-verification-secret".to_string(),
            soft_descriptor: None,
            skip_authentication: false,
            requires_approval: false,
            store_tokens: true,
            enable_transaction_log: false,
            default_locale: default_locale(),
            timeout_secs: default_gateway_timeout(),
            return_url: "https://shop.example.com/checkout/return".to_string(),
        }
    }
}

/// Layers `config/default.toml`, an environment-specific file and
/// `APP_`-prefixed environment variables into a validated [`AppConfig`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();
    let default_file = Path::new(CONFIG_DIR).join("default.toml");
    if default_file.exists() {
        builder = builder.add_source(File::from(default_file));
    }
    let env_file = Path::new(CONFIG_DIR).join(format!("{run_env}.toml"));
    if env_file.exists() {
        builder = builder.add_source(File::from(env_file));
    }
    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber from configuration.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
