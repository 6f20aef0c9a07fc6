use clap::Parser;
use std::net::SocketAddr;

use parcel_payments::cli::{self, Cli, Commands, DbCommands, TxCommands};
use parcel_payments::config::Config;
use parcel_payments::use_cases::ReconcilePayment;
use parcel_payments::{create_app, services, startup, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    startup::init_tracing(config.log_format);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
        Commands::Tx(TxCommands::Show { reference }) => {
            let store = startup::build_store(&config).await?;
            cli::handle_tx_show(store.as_ref(), &reference).await
        }
        Commands::Tx(TxCommands::Reconcile { reference }) => {
            let store = startup::build_store(&config).await?;
            let providers = startup::build_providers(&config)?;
            let reconciler = ReconcilePayment::new(store, providers);
            cli::handle_tx_reconcile(&reconciler, &reference).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = startup::build_store(&config).await?;
    let providers = startup::build_providers(&config)?;
    let state = AppState::new(store.clone(), providers, config.initiation());

    if let Some(settings) = config.sweeper() {
        tokio::spawn(services::run_sweeper(
            store,
            state.reconciler.clone(),
            settings,
        ));
    }

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
