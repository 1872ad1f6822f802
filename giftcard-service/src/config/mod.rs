//! Configuration module for giftcard-service.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;

use crate::services::ServicePolicy;

#[derive(Debug, Clone)]
pub struct GiftCardConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    pub payment_gateway: PaymentGatewayConfig,
    pub sweeper: SweeperConfig,
    pub policy: ServicePolicy,
}

#[derive(Debug, Clone)]
pub enum StorageBackend {
    Postgres(DatabaseConfig),
    /// Process-local; everything is lost on restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PaymentGatewayConfig {
    pub url: String,
    pub api_key: Secret<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval: Duration,
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl GiftCardConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let storage = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StorageBackend::Memory,
            "postgres" => StorageBackend::Postgres(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed_or("DATABASE_MIN_CONNECTIONS", 2),
            }),
            other => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let defaults = ServicePolicy::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "giftcard-service".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            storage,
            payment_gateway: PaymentGatewayConfig {
                url: env::var("PAYMENT_GATEWAY_URL")
                    .unwrap_or_else(|_| "http://payment-gateway:3003".to_string()),
                api_key: Secret::new(env::var("PAYMENT_GATEWAY_API_KEY").unwrap_or_default()),
                timeout: Duration::from_secs(parsed_or("PAYMENT_GATEWAY_TIMEOUT_SECS", 10)),
            },
            sweeper: SweeperConfig {
                enabled: parsed_or("SWEEPER_ENABLED", true),
                interval: Duration::from_secs(parsed_or("SWEEPER_INTERVAL_SECS", 300).max(1)),
            },
            policy: ServicePolicy {
                default_expiry_days: parsed_or(
                    "GIFT_CARD_DEFAULT_EXPIRY_DAYS",
                    defaults.default_expiry_days,
                ),
                personal_expiry_days: parsed_or(
                    "PERSONAL_GIFT_CARD_EXPIRY_DAYS",
                    defaults.personal_expiry_days,
                ),
                max_retries: parsed_or("TRANSACTION_MAX_RETRIES", defaults.max_retries),
                charge_attempts: parsed_or("CHARGE_ATTEMPTS", defaults.charge_attempts).max(1),
                charge_retry_delay: Duration::from_millis(parsed_or(
                    "CHARGE_RETRY_DELAY_MS",
                    defaults.charge_retry_delay.as_millis() as u64,
                )),
            },
        })
    }

    /// In-memory storage on an ephemeral loopback port, sweeper off.
    pub fn for_tests() -> Self {
        Self {
            common: core_config::Config::ephemeral(),
            service_name: "giftcard-service".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            storage: StorageBackend::Memory,
            payment_gateway: PaymentGatewayConfig {
                url: "http://127.0.0.1:9".to_string(),
                api_key: Secret::new(String::new()),
                timeout: Duration::from_secs(2),
            },
            sweeper: SweeperConfig {
                enabled: false,
                interval: Duration::from_secs(300),
            },
            policy: ServicePolicy::default(),
        }
    }
}
