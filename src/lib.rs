pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod providers;
pub mod services;
pub mod startup;
pub mod use_cases;
pub mod utils;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::ports::TransactionStore;
use crate::providers::ProviderRegistry;
use crate::use_cases::{InitiatePayment, InitiationSettings, ReconcilePayment};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub providers: ProviderRegistry,
    pub initiator: Arc<InitiatePayment>,
    pub reconciler: Arc<ReconcilePayment>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        providers: ProviderRegistry,
        initiation: InitiationSettings,
    ) -> Self {
        let initiator = Arc::new(InitiatePayment::new(
            store.clone(),
            providers.clone(),
            initiation,
        ));
        let reconciler = Arc::new(ReconcilePayment::new(store.clone(), providers.clone()));

        Self {
            store,
            providers,
            initiator,
            reconciler,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/payments/initiate", post(handlers::payments::initiate))
        .route(
            "/payments/webhook",
            get(handlers::webhook::webhook_get).post(handlers::webhook::webhook_post),
        )
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(
                    middleware::request_logger::request_logger_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
