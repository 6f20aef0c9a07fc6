use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::ports::TransactionStore;
use crate::use_cases::{Notification, NotificationChannel, ReconcilePayment};

#[derive(Parser)]
#[command(name = "parcel-payments")]
#[command(about = "Parcel Payments - wallet deposit initiation and webhook reconciliation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Print a transaction by reference
    Show {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },

    /// Re-verify a transaction with its provider and settle it
    Reconcile {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_show(store: &dyn TransactionStore, reference: &str) -> anyhow::Result<()> {
    match store.find_by_reference(reference).await? {
        Some(tx) => {
            println!("{}", serde_json::to_string_pretty(&tx)?);
            Ok(())
        }
        None => {
            tracing::warn!("Transaction {} not found", reference);
            anyhow::bail!("Transaction {} not found", reference)
        }
    }
}

pub async fn handle_tx_reconcile(
    reconciler: &ReconcilePayment,
    reference: &str,
) -> anyhow::Result<()> {
    let outcome = reconciler
        .execute(Notification::new(reference, NotificationChannel::Operator))
        .await;

    match outcome.verification() {
        "error" => anyhow::bail!("Reconciliation of {} failed: {:?}", reference, outcome),
        verification => {
            println!("✓ Transaction {} reconciled: {} ({:?})", reference, verification, outcome);
            Ok(())
        }
    }
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for migrations"))?;
    let pool = crate::db::create_pool(database_url, config.database_max_connections).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Store Backend: {:?}", config.store_backend);
    if let Some(url) = config.database_url.as_deref() {
        println!("  Database URL: {}", mask_password(url));
    }
    println!("  Currency: {}", config.payment_currency);
    println!("  Webhook URL: {}", config.payment_webhook_url);
    println!("  Return URL: {}", config.payment_return_url);
    println!("  Chapa: {}", enabled(config.chapa_secret_key.is_some()));
    println!(
        "  Chapa Webhook Secret: {}",
        enabled(config.chapa_webhook_secret.is_some())
    );
    println!("  Chapa Base URL: {}", config.chapa_base_url);
    match config.sweeper() {
        Some(sweeper) => println!(
            "  Pending Sweeper: every {}s, rows older than {}s, batch {}",
            sweeper.interval.as_secs(),
            sweeper.min_age.as_secs(),
            sweeper.batch_size
        ),
        None => println!("  Pending Sweeper: disabled"),
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn enabled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
