//! Payment provider integrations.
//!
//! A provider opens hosted checkout sessions and answers authoritative
//! verification queries by reference. Notification payloads are never
//! trusted on their own; the reconciler always asks the provider.

pub mod chapa;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::PaymentMethod;

pub use chapa::{ChapaConfig, ChapaProvider};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request to {provider} failed: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} is unavailable (HTTP {status})")]
    Unavailable { provider: &'static str, status: u16 },

    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: &'static str,
        message: String,
    },

    #[error("invalid response from {provider}: {message}")]
    MalformedResponse {
        provider: &'static str,
        message: String,
    },

    #[error("circuit breaker open for {provider}")]
    CircuitOpen { provider: &'static str },
}

/// Customer details the hosted checkout pages require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub customer: Customer,
    /// Server-to-server notification target, carrying the reference.
    pub callback_url: String,
    /// Where the payer's browser lands after checkout.
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub checkout_url: String,
}

/// What the provider reports for a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedStatus {
    Success,
    Failed,
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub status: VerifiedStatus,
    /// Excerpt of the provider response, stored as informational metadata.
    pub excerpt: serde_json::Value,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Open a hosted checkout session for `request.reference`.
    async fn create_checkout(&self, request: &CheckoutRequest)
        -> Result<CheckoutSession, ProviderError>;

    /// Ask the provider for the current state of `reference`.
    async fn verify(&self, reference: &str) -> Result<Verification, ProviderError>;

    /// Check a webhook signature header against the raw body.
    ///
    /// Returns `None` when the provider has no signing secret configured.
    fn validate_webhook_signature(&self, _payload: &[u8], _signature: &str) -> Option<bool> {
        None
    }
}

/// Providers available in this deployment, keyed by method.
///
/// Methods without an entry are accepted by the API but not implemented:
/// initiation rejects them and verification treats them as indeterminate.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<HashMap<PaymentMethod, Arc<dyn PaymentProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(self, provider: Arc<dyn PaymentProvider>) -> Self {
        let mut providers: HashMap<_, _> = self.providers.as_ref().clone();
        providers.insert(provider.method(), provider);
        Self {
            providers: Arc::new(providers),
        }
    }

    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&method).cloned()
    }

    /// Enabled methods in declaration order.
    pub fn methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|method| self.providers.contains_key(method))
            .collect()
    }
}
