use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("unknown STORAGE_BACKEND `{other}`, expected `postgres` or `memory`"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    pub max_connections: u32,
}

/// Knobs of the escrow engine itself.
#[derive(Debug, Clone)]
pub struct EscrowConfig {
    /// Orders at or above this total are verified with a PIN.
    pub verification_threshold: Money,
    pub pin_length: usize,
    pub currency: String,
    /// Delay between capture and the earliest release.
    pub release_delay: chrono::Duration,
    /// After this long a `processing` webhook event may be reclaimed.
    pub webhook_stale_after: chrono::Duration,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            verification_threshold: Money::from_decimal_unchecked(Decimal::from(120)),
            pin_length: 4,
            currency: "USD".to_string(),
            release_delay: chrono::Duration::hours(24),
            webhook_stale_after: chrono::Duration::seconds(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentProviderConfig {
    /// `None` selects the built-in sandbox provider.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub escrow: EscrowConfig,
    pub payment_provider: PaymentProviderConfig,
    /// `None` logs notifications instead of sending them.
    pub notification_service_url: Option<String>,
}

const SANDBOX_WEBHOOK_SECRET: &str = "sandbox-webhook-secret";

fn optional_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid value for {key}: `{raw}`")),
        None => Ok(default),
    }
}

/// Reads the configuration from the environment, `.env` included.
pub fn load() -> Result<AppConfig> {
    let backend: StorageBackend = parsed_var("STORAGE_BACKEND", StorageBackend::Postgres)?;
    let database_url = match (backend, optional_var("DATABASE_URL")) {
        (_, Some(url)) => url,
        (StorageBackend::Memory, None) => String::new(),
        (StorageBackend::Postgres, None) => bail!("DATABASE_URL must be set for the postgres backend"),
    };

    let defaults = EscrowConfig::default();
    let threshold: Decimal = parsed_var("VERIFICATION_THRESHOLD", defaults.verification_threshold.value())?;
    let pin_length: usize = parsed_var("DELIVERY_PIN_LENGTH", defaults.pin_length)?;
    if !(4..=8).contains(&pin_length) {
        bail!("DELIVERY_PIN_LENGTH must be between 4 and 8, got {pin_length}");
    }
    let release_delay_hours: i64 = parsed_var("ESCROW_RELEASE_DELAY_HOURS", 24)?;
    let stale_after_secs: i64 = parsed_var("WEBHOOK_STALE_AFTER_SECS", 300)?;

    let provider_url = optional_var("PAYMENT_PROVIDER_URL");
    let webhook_secret = match (&provider_url, optional_var("PAYMENT_WEBHOOK_SECRET")) {
        (_, Some(secret)) => secret,
        (None, None) => SANDBOX_WEBHOOK_SECRET.to_string(),
        (Some(_), None) => bail!("PAYMENT_WEBHOOK_SECRET must be set when PAYMENT_PROVIDER_URL is"),
    };

    Ok(AppConfig {
        server: ServerConfig {
            host: optional_var("SERVER_HOST").unwrap_or("0.0.0.0".to_string()),
            port: parsed_var("SERVER_PORT", 3000)?,
        },
        storage: StorageConfig {
            backend,
            database_url,
            max_connections: parsed_var("DATABASE_MAX_CONNECTIONS", 10)?,
        },
        escrow: EscrowConfig {
            verification_threshold: Money::positive(threshold)
                .map_err(|e| anyhow::anyhow!("Invalid VERIFICATION_THRESHOLD: {e}"))?,
            pin_length,
            currency: optional_var("ESCROW_CURRENCY")
                .unwrap_or(defaults.currency)
                .to_ascii_uppercase(),
            release_delay: chrono::Duration::hours(release_delay_hours),
            webhook_stale_after: chrono::Duration::seconds(stale_after_secs),
        },
        payment_provider: PaymentProviderConfig {
            url: provider_url,
            api_key: optional_var("PAYMENT_PROVIDER_API_KEY"),
            webhook_secret,
        },
        notification_service_url: optional_var("NOTIFICATION_SERVICE_URL"),
    })
}
