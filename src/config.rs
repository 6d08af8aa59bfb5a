use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::reconciliation::{FlowSettings, ReferenceKeys};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SESSION_NAMESPACE: &str = "storefront:checkout";
const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
const DEFAULT_REMOTE_CALL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REDIRECT_DELAY_MS: u64 = 2_000;
const DEFAULT_ORDER_SUCCESS_PATH: &str = "/orders/{orderId}/success";
const DEFAULT_PAYMENT_RETRY_PATH: &str = "/checkout/payment";
const DEFAULT_REFERENCE_KEY: &str = "reference";
const DEFAULT_LEGACY_REFERENCE_KEY: &str = "trxref";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL backing the durable checkout session slot
    pub redis_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Public base URL of the storefront, used to build the gateway callback URL
    #[validate(url)]
    pub public_base_url: String,

    /// Base URL of the payment gateway REST API
    #[validate(url)]
    pub gateway_base_url: String,

    /// Secret key for the payment gateway
    #[serde(default)]
    pub gateway_secret_key: Option<String>,

    /// Timeout for a single gateway HTTP call (seconds)
    #[serde(default = "default_remote_call_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub gateway_timeout_secs: u64,

    /// Currency sent to the gateway when initializing a payment
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Secret used to verify identity tokens (HS256); absent means every buyer is a guest
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Namespace prefix for checkout session keys
    #[serde(default = "default_session_namespace")]
    pub session_namespace: String,

    /// TTL of the durable checkout session slot (seconds)
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub session_ttl_secs: u64,

    /// Ceiling for the verify-payment call made during reconciliation (seconds)
    #[serde(default = "default_remote_call_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub verify_timeout_secs: u64,

    /// Ceiling for the create-order call made during reconciliation (seconds)
    #[serde(default = "default_remote_call_timeout_secs")]
    #[validate(range(min = 1, max = 300))]
    pub create_order_timeout_secs: u64,

    /// Delay before the success view redirect (milliseconds)
    #[serde(default = "default_redirect_delay_ms")]
    pub redirect_delay_ms: u64,

    /// Success view path template; `{orderId}` is substituted
    #[serde(default = "default_order_success_path")]
    pub order_success_path: String,

    /// Path offered as the retry action after a failed reconciliation
    #[serde(default = "default_payment_retry_path")]
    pub payment_retry_path: String,

    /// Query parameter carrying the payment reference on the gateway redirect
    #[serde(default = "default_reference_key")]
    #[validate(length(min = 1))]
    pub reference_query_key: String,

    /// Legacy query parameter name for the payment reference
    #[serde(default = "default_legacy_reference_key")]
    #[validate(length(min = 1))]
    pub legacy_reference_query_key: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the connection settings
    pub fn new(
        database_url: String,
        redis_url: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            redis_url,
            public_base_url: format!("http://{}:{}", host, port),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            cors_allowed_origins: None,
            gateway_base_url: "http://127.0.0.1:9099".to_string(),
            gateway_secret_key: None,
            gateway_timeout_secs: default_remote_call_timeout_secs(),
            currency: default_currency(),
            jwt_secret: None,
            session_namespace: default_session_namespace(),
            session_ttl_secs: default_session_ttl_secs(),
            verify_timeout_secs: default_remote_call_timeout_secs(),
            create_order_timeout_secs: default_remote_call_timeout_secs(),
            redirect_delay_ms: default_redirect_delay_ms(),
            order_success_path: default_order_success_path(),
            payment_retry_path: default_payment_retry_path(),
            reference_query_key: default_reference_key(),
            legacy_reference_query_key: default_legacy_reference_key(),
            event_channel_capacity: default_event_channel_capacity(),
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

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// URL the gateway redirects the buyer to after payment
    pub fn callback_url(&self) -> String {
        format!(
            "{}/payment/callback",
            self.public_base_url.trim_end_matches('/')
        )
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Reconciliation settings derived from this configuration
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            reference_keys: ReferenceKeys::new(
                self.reference_query_key.clone(),
                self.legacy_reference_query_key.clone(),
            ),
            verify_timeout: Duration::from_secs(self.verify_timeout_secs),
            create_timeout: Duration::from_secs(self.create_order_timeout_secs),
            redirect_delay: Duration::from_millis(self.redirect_delay_ms),
            success_path: self.order_success_path.clone(),
            retry_path: self.payment_retry_path.clone(),
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.gateway_secret_key.as_deref().map_or(true, str::is_empty)
        {
            let mut err = ValidationError::new("gateway_secret_key_required");
            err.message =
                Some("Set APP__GATEWAY_SECRET_KEY for non-development environments".into());
            errors.add("gateway_secret_key", err);
        }

        if self.is_production() && self.jwt_secret.as_deref().map_or(true, |s| s.len() < 32) {
            let mut err = ValidationError::new("jwt_secret_too_short");
            err.message = Some(
                "APP__JWT_SECRET must be at least 32 characters in production so buyer identity can be verified"
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !self.order_success_path.contains("{orderId}") {
            let mut err = ValidationError::new("order_success_path_placeholder");
            err.message = Some("order_success_path must contain the {orderId} placeholder".into());
            errors.add("order_success_path", err);
        }

        if self.reference_query_key == self.legacy_reference_query_key {
            let mut err = ValidationError::new("reference_keys_distinct");
            err.message = Some("reference query keys must differ".into());
            errors.add("legacy_reference_query_key", err);
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
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}

fn default_db_min_connections() -> u32 {
    2
}

fn default_remote_call_timeout_secs() -> u64 {
    DEFAULT_REMOTE_CALL_TIMEOUT_SECS
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_session_namespace() -> String {
    DEFAULT_SESSION_NAMESPACE.to_string()
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_redirect_delay_ms() -> u64 {
    DEFAULT_REDIRECT_DELAY_MS
}

fn default_order_success_path() -> String {
    DEFAULT_ORDER_SUCCESS_PATH.to_string()
}

fn default_payment_retry_path() -> String {
    DEFAULT_PAYMENT_RETRY_PATH.to_string()
}

fn default_reference_key() -> String {
    DEFAULT_REFERENCE_KEY.to_string()
}

fn default_legacy_reference_key() -> String {
    DEFAULT_LEGACY_REFERENCE_KEY.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
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

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("redis_url", "redis://localhost:6379")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("public_base_url", "http://localhost:8080")?
        .set_default("gateway_base_url", "http://127.0.0.1:9099")?
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
