use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::adapters::{InMemoryTransactionStore, PostgresTransactionStore};
use crate::config::{Config, LogFormat, StoreBackend};
use crate::db;
use crate::domain::PaymentMethod;
use crate::ports::TransactionStore;
use crate::providers::{ChapaProvider, ProviderRegistry};

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

pub async fn build_store(config: &Config) -> Result<Arc<dyn TransactionStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; transactions are lost on restart");
            Ok(Arc::new(InMemoryTransactionStore::new()))
        }
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required when STORE_BACKEND=postgres")?;
            let pool = db::create_pool(database_url, config.database_max_connections)
                .await
                .context("failed to connect to Postgres")?;

            if config.run_migrations {
                db::run_migrations(&pool).await?;
            }

            Ok(Arc::new(PostgresTransactionStore::new(pool)))
        }
    }
}

pub fn build_providers(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    match config.chapa() {
        Some(chapa) => {
            tracing::info!("Chapa client initialized with URL: {}", chapa.base_url);
            registry = registry.with_provider(Arc::new(ChapaProvider::new(chapa)?));
        }
        None => tracing::warn!("CHAPA_SECRET_KEY not set; chapa payments are disabled"),
    }

    let enabled = registry.methods();
    let disabled: Vec<&str> = PaymentMethod::ALL
        .iter()
        .filter(|method| !enabled.contains(method))
        .map(|method| method.as_str())
        .collect();
    if !disabled.is_empty() {
        tracing::info!(
            "Payment methods without an integration (initiation rejected, verification pending): {}",
            disabled.join(", ")
        );
    }

    Ok(registry)
}
