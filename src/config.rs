use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::providers::ChapaConfig;
use crate::services::SweeperSettings;
use crate::use_cases::InitiationSettings;

/// Which TransactionStore implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => bail!("STORE_BACKEND must be 'postgres' or 'memory', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub run_migrations: bool,
    pub payment_currency: String,
    pub payment_webhook_url: Url,
    pub payment_return_url: Url,
    pub chapa_secret_key: Option<String>,
    pub chapa_base_url: String,
    pub chapa_webhook_secret: Option<String>,
    pub provider_timeout_secs: u64,
    pub provider_failure_threshold: u32,
    pub provider_reset_timeout_secs: u64,
    /// 0 disables the sweeper.
    pub pending_sweep_interval_secs: u64,
    pub pending_sweep_min_age_secs: u64,
    pub pending_sweep_batch_size: i64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an explicit map instead of the process
    /// environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let parsed = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let config = Config {
            server_port: parsed("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a port number")?,
            store_backend: parsed("STORE_BACKEND", "postgres").parse()?,
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", "5")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?,
            run_migrations: parse_bool("RUN_MIGRATIONS", &parsed("RUN_MIGRATIONS", "true"))?,
            payment_currency: parsed("PAYMENT_CURRENCY", "ETB").to_ascii_uppercase(),
            payment_webhook_url: parse_url(
                "PAYMENT_WEBHOOK_URL",
                var("PAYMENT_WEBHOOK_URL").context("PAYMENT_WEBHOOK_URL is required")?,
            )?,
            payment_return_url: parse_url(
                "PAYMENT_RETURN_URL",
                var("PAYMENT_RETURN_URL").context("PAYMENT_RETURN_URL is required")?,
            )?,
            chapa_secret_key: var("CHAPA_SECRET_KEY"),
            chapa_base_url: parsed("CHAPA_BASE_URL", "https://api.chapa.co"),
            chapa_webhook_secret: var("CHAPA_WEBHOOK_SECRET"),
            provider_timeout_secs: parsed("PROVIDER_TIMEOUT_SECS", "30")
                .parse()
                .context("PROVIDER_TIMEOUT_SECS must be a number of seconds")?,
            provider_failure_threshold: parsed("PROVIDER_FAILURE_THRESHOLD", "5")
                .parse()
                .context("PROVIDER_FAILURE_THRESHOLD must be a positive integer")?,
            provider_reset_timeout_secs: parsed("PROVIDER_RESET_TIMEOUT_SECS", "60")
                .parse()
                .context("PROVIDER_RESET_TIMEOUT_SECS must be a number of seconds")?,
            pending_sweep_interval_secs: parsed("PENDING_SWEEP_INTERVAL_SECS", "0")
                .parse()
                .context("PENDING_SWEEP_INTERVAL_SECS must be a number of seconds")?,
            pending_sweep_min_age_secs: parsed("PENDING_SWEEP_MIN_AGE_SECS", "300")
                .parse()
                .context("PENDING_SWEEP_MIN_AGE_SECS must be a number of seconds")?,
            pending_sweep_batch_size: parsed("PENDING_SWEEP_BATCH_SIZE", "50")
                .parse()
                .context("PENDING_SWEEP_BATCH_SIZE must be a positive integer")?,
            log_format: parsed("LOG_FORMAT", "pretty").parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            bail!("SERVER_PORT must be greater than 0");
        }
        if self.store_backend == StoreBackend::Postgres && self.database_url.is_none() {
            bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }
        if self.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.payment_currency.len() != 3
            || !self.payment_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            bail!("PAYMENT_CURRENCY must be a three-letter ISO code");
        }
        if self.provider_timeout_secs == 0 {
            bail!("PROVIDER_TIMEOUT_SECS must be greater than 0");
        }
        if self.provider_failure_threshold == 0 {
            bail!("PROVIDER_FAILURE_THRESHOLD must be greater than 0");
        }
        if self.pending_sweep_batch_size <= 0 {
            bail!("PENDING_SWEEP_BATCH_SIZE must be greater than 0");
        }
        Url::parse(&self.chapa_base_url).context("CHAPA_BASE_URL is not a valid URL")?;

        Ok(())
    }

    /// Chapa settings, present only when a secret key is configured.
    pub fn chapa(&self) -> Option<ChapaConfig> {
        let secret_key = self.chapa_secret_key.clone()?;
        Some(ChapaConfig {
            secret_key,
            base_url: self.chapa_base_url.clone(),
            webhook_secret: self.chapa_webhook_secret.clone(),
            timeout_secs: self.provider_timeout_secs,
            failure_threshold: self.provider_failure_threshold,
            reset_timeout_secs: self.provider_reset_timeout_secs,
        })
    }

    pub fn initiation(&self) -> InitiationSettings {
        InitiationSettings {
            currency: self.payment_currency.clone(),
            webhook_url: self.payment_webhook_url.clone(),
            return_url: self.payment_return_url.clone(),
        }
    }

    /// Sweeper settings, or `None` when the sweeper is disabled.
    pub fn sweeper(&self) -> Option<SweeperSettings> {
        if self.pending_sweep_interval_secs == 0 {
            return None;
        }
        Some(SweeperSettings {
            interval: Duration::from_secs(self.pending_sweep_interval_secs),
            min_age: Duration::from_secs(self.pending_sweep_min_age_secs),
            batch_size: self.pending_sweep_batch_size,
        })
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("{} must be true or false, got '{}'", key, other),
    }
}

fn parse_url(key: &str, raw: String) -> Result<Url> {
    let url = Url::parse(&raw).with_context(|| format!("{} is not a valid URL", key))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{} must be an http(s) URL", key);
    }
    Ok(url)
}
