//! Initiate payment use case.
//! Opens a provider checkout session and records the pending transaction.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use crate::domain::{generate_reference, Transaction};
use crate::error::AppError;
use crate::ports::TransactionStore;
use crate::providers::{CheckoutRequest, ProviderRegistry};
use crate::validation::ValidDeposit;

/// Deployment-wide settings for checkout sessions.
#[derive(Debug, Clone)]
pub struct InitiationSettings {
    pub currency: String,
    /// Server-to-server notification endpoint (`/payments/webhook`).
    pub webhook_url: Url,
    /// Client page the payer is sent back to.
    pub return_url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiationOutput {
    pub checkout_url: String,
    pub reference: String,
    /// Set when the checkout exists at the provider but the pending row could
    /// not be recorded. The webhook for it will find no transaction.
    pub reconciliation_required: bool,
}

pub struct InitiatePayment {
    store: Arc<dyn TransactionStore>,
    providers: ProviderRegistry,
    settings: InitiationSettings,
}

impl InitiatePayment {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        providers: ProviderRegistry,
        settings: InitiationSettings,
    ) -> Self {
        Self {
            store,
            providers,
            settings,
        }
    }

    pub async fn execute(&self, deposit: ValidDeposit) -> Result<InitiationOutput, AppError> {
        let provider = self
            .providers
            .get(deposit.method)
            .ok_or(AppError::UnsupportedMethod(deposit.method))?;

        let reference = generate_reference(deposit.method, &deposit.customer.id, Utc::now());

        let mut callback_url = self.settings.webhook_url.clone();
        callback_url
            .query_pairs_mut()
            .append_pair("tx_ref", &reference)
            .append_pair("source", deposit.method.as_str());
        let mut return_url = self.settings.return_url.clone();
        return_url.query_pairs_mut().append_pair("tx_ref", &reference);

        let request = CheckoutRequest {
            reference: reference.clone(),
            amount: deposit.amount.clone(),
            currency: self.settings.currency.clone(),
            customer: deposit.customer.clone(),
            callback_url: callback_url.to_string(),
            return_url: return_url.to_string(),
        };

        let session = provider.create_checkout(&request).await.map_err(|e| {
            warn!(
                reference = %reference,
                method = %deposit.method,
                error = %e,
                "Checkout initialization failed"
            );
            AppError::Provider(e)
        })?;

        let tx = Transaction::new_pending(
            reference.clone(),
            deposit.customer.id.clone(),
            deposit.amount.clone(),
            deposit.method,
            json!({
                "provider": deposit.method.as_str(),
                "initiated_at": Utc::now().to_rfc3339(),
            }),
        );

        let reconciliation_required = match self.store.insert(&tx).await {
            Ok(_) => {
                info!(
                    reference = %reference,
                    user_id = %tx.user_id,
                    amount = %tx.amount,
                    method = %tx.method,
                    "Payment initiated"
                );
                false
            }
            Err(e) => {
                error!(
                    reference = %reference,
                    user_id = %tx.user_id,
                    amount = %tx.amount,
                    method = %tx.method,
                    error = %e,
                    reconciliation_required = true,
                    "Checkout created but pending transaction was not recorded"
                );
                true
            }
        };

        Ok(InitiationOutput {
            checkout_url: session.checkout_url,
            reference,
            reconciliation_required,
        })
    }
}
