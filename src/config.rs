use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SIGNATURE_TOLERANCE_SECS: u64 = 300;
const DEFAULT_MAX_WEBHOOK_BODY_BYTES: usize = 64 * 1024;
const DEFAULT_LEDGER_LEASE_SECS: u64 = 60;
const DEFAULT_PROCESSING_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_APPLY_RETRY_LIMIT: u32 = 5;
const DEFAULT_VOID_WINDOW_SECS: i64 = 86_400;
const DEFAULT_NOTIFIER_MAX_RETRIES: u32 = 3;

/// Development-only webhook secrets. Rejected outside the development
/// environment so a deployment cannot silently verify against known values.
const DEV_DEFAULT_CARD_SECRET: &str = "dev_card_gateway_webhook_secret_do_not_use_in_production";
const DEV_DEFAULT_WALLET_SECRET: &str =
    "dev_wallet_gateway_webhook_secret_do_not_use_in_production";

/// Application configuration with validation.
///
/// Provider secrets are loaded once at startup and passed explicitly into the
/// verifiers; rotation is out-of-band and requires a restart.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Shared secret for CardGateway raw-body signatures (min 32 chars)
    #[validate(length(min = 32))]
    pub card_webhook_secret: String,

    /// Shared secret for WalletGateway field-set HMACs (min 32 chars)
    #[validate(length(min = 32))]
    pub wallet_webhook_secret: String,

    /// Signature timestamp tolerance in seconds (CardGateway)
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: u64,

    /// Maximum accepted webhook body size in bytes
    #[serde(default = "default_max_webhook_body_bytes")]
    pub max_webhook_body_bytes: usize,

    /// Lease duration for ledger reservations; an expired reservation is
    /// re-reservable so a crashed worker cannot wedge an event forever
    #[serde(default = "default_ledger_lease_secs")]
    pub ledger_lease_secs: u64,

    /// Per-webhook processing budget in milliseconds; exceeding it returns a
    /// retryable error to the provider
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,

    /// Bound on optimistic-write retries for a single event
    #[serde(default = "default_apply_retry_limit")]
    pub apply_retry_limit: u32,

    /// Seconds after settlement during which a provider void is accepted
    #[serde(default = "default_void_window_secs")]
    pub void_window_secs: i64,

    /// Downstream fulfillment webhook URL; notifier disabled when unset
    #[serde(default)]
    pub fulfillment_webhook_url: Option<String>,

    /// Secret for signing outbound fulfillment notifications
    #[serde(default)]
    pub fulfillment_webhook_secret: Option<String>,

    /// Delivery attempts for one fulfillment notification
    #[serde(default = "default_notifier_max_retries")]
    pub notifier_max_retries: u32,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
}

impl AppConfig {
    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn processing_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.processing_timeout_ms)
    }

    pub fn ledger_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ledger_lease_secs as i64)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() {
            if self.card_webhook_secret.trim() == DEV_DEFAULT_CARD_SECRET {
                let mut err = ValidationError::new("card_webhook_secret_default_dev");
                err.message = Some(
                    "The bundled development CardGateway secret must not be used outside development. Set APP__CARD_WEBHOOK_SECRET."
                        .into(),
                );
                errors.add("card_webhook_secret", err);
            }
            if self.wallet_webhook_secret.trim() == DEV_DEFAULT_WALLET_SECRET {
                let mut err = ValidationError::new("wallet_webhook_secret_default_dev");
                err.message = Some(
                    "The bundled development WalletGateway secret must not be used outside development. Set APP__WALLET_WEBHOOK_SECRET."
                        .into(),
                );
                errors.add("wallet_webhook_secret", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_signature_tolerance_secs() -> u64 {
    DEFAULT_SIGNATURE_TOLERANCE_SECS
}
fn default_max_webhook_body_bytes() -> usize {
    DEFAULT_MAX_WEBHOOK_BODY_BYTES
}
fn default_ledger_lease_secs() -> u64 {
    DEFAULT_LEDGER_LEASE_SECS
}
fn default_processing_timeout_ms() -> u64 {
    DEFAULT_PROCESSING_TIMEOUT_MS
}
fn default_apply_retry_limit() -> u32 {
    DEFAULT_APPLY_RETRY_LIMIT
}
fn default_void_window_secs() -> i64 {
    DEFAULT_VOID_WINDOW_SECS
}
fn default_notifier_max_retries() -> u32 {
    DEFAULT_NOTIFIER_MAX_RETRIES
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("paysync_api={},tower_http=debug", level);
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

    // NOTE: provider secrets default to dev-only values that are rejected by
    // validation outside development.
    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("card_webhook_secret", DEV_DEFAULT_CARD_SECRET)?
        .set_default("wallet_webhook_secret", DEV_DEFAULT_WALLET_SECRET)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
