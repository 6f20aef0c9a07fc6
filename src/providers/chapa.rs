//! Chapa hosted checkout integration.
//!
//! Initialization: `POST /v1/transaction/initialize` returns a checkout URL.
//! Verification: `GET /v1/transaction/verify/{tx_ref}` is the authoritative
//! source for whether a payment went through.

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    CheckoutRequest, CheckoutSession, PaymentProvider, ProviderError, Verification,
    VerifiedStatus,
};
use crate::domain::PaymentMethod;

const PROVIDER: &str = "chapa";
const CHECKOUT_TITLE: &str = "Wallet deposit";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct ChapaConfig {
    pub secret_key: String,
    /// Defaults to https://api.chapa.co
    pub base_url: String,
    /// Secret hash configured on the Chapa dashboard for webhook signing.
    pub webhook_secret: Option<String>,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

impl Default for ChapaConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            base_url: "https://api.chapa.co".to_string(),
            webhook_secret: None,
            timeout_secs: 30,
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

/// HTTP client for the Chapa API, guarded by a circuit breaker.
#[derive(Clone)]
pub struct ChapaProvider {
    client: Client,
    config: ChapaConfig,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl ChapaProvider {
    pub fn new(config: ChapaConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| ProviderError::Transport {
                provider: PROVIDER,
                source,
            })?;

        let backoff = backoff::equal_jittered(
            Duration::from_secs(config.reset_timeout_secs),
            Duration::from_secs(config.reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(config.failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.config.secret_key)
    }

    /// Sends a request through the circuit breaker.
    ///
    /// Only transport failures and 5xx answers count against the breaker;
    /// 4xx answers are returned to the caller for interpretation.
    async fn send(&self, request: RequestBuilder) -> Result<(StatusCode, String), ProviderError> {
        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await.map_err(|source| ProviderError::Transport {
                    provider: PROVIDER,
                    source,
                })?;
                let status = response.status();
                let body = response.text().await.map_err(|source| ProviderError::Transport {
                    provider: PROVIDER,
                    source,
                })?;

                if status.is_server_error() {
                    return Err(ProviderError::Unavailable {
                        provider: PROVIDER,
                        status: status.as_u16(),
                    });
                }

                Ok((status, body))
            })
            .await;

        match result {
            Ok(answer) => Ok(answer),
            Err(FailsafeError::Rejected) => Err(ProviderError::CircuitOpen { provider: PROVIDER }),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl PaymentProvider for ChapaProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Chapa
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        info!(
            reference = %request.reference,
            amount = %request.amount,
            currency = %request.currency,
            "Initializing Chapa checkout"
        );

        let payload = json!({
            "amount": request.amount.to_string(),
            "currency": request.currency,
            "email": request.customer.email,
            "first_name": request.customer.first_name,
            "last_name": request.customer.last_name,
            "tx_ref": request.reference,
            "callback_url": request.callback_url,
            "return_url": request.return_url,
            "customization": {
                "title": CHECKOUT_TITLE,
            },
        });

        let http = self.authorized(
            self.client
                .post(self.url("/v1/transaction/initialize"))
                .json(&payload),
        );
        let (status, body) = self.send(http).await?;

        let envelope: ChapaEnvelope<InitializeData> =
            serde_json::from_str(&body).map_err(|e| ProviderError::MalformedResponse {
                provider: PROVIDER,
                message: format!("HTTP {}: {}", status.as_u16(), e),
            })?;

        match envelope.data {
            Some(data) if status.is_success() && envelope.status == "success" => {
                info!(reference = %request.reference, "Chapa checkout created");
                Ok(CheckoutSession {
                    checkout_url: data.checkout_url,
                })
            }
            _ => {
                let message = message_text(&envelope.message);
                warn!(
                    reference = %request.reference,
                    status = status.as_u16(),
                    message = %message,
                    "Chapa rejected checkout initialization"
                );
                Err(ProviderError::Rejected {
                    provider: PROVIDER,
                    message,
                })
            }
        }
    }

    async fn verify(&self, reference: &str) -> Result<Verification, ProviderError> {
        debug!(reference = %reference, "Verifying Chapa transaction");

        let http = self.authorized(
            self.client
                .get(self.url(&format!("/v1/transaction/verify/{}", reference))),
        );
        let (status, body) = self.send(http).await?;

        let envelope: ChapaEnvelope<VerifyData> =
            serde_json::from_str(&body).map_err(|e| ProviderError::MalformedResponse {
                provider: PROVIDER,
                message: format!("HTTP {}: {}", status.as_u16(), e),
            })?;

        // A 4xx here (unknown tx_ref, bad key) says nothing definite about the
        // payment, so it surfaces as an error rather than a failure.
        let data = match envelope.data {
            Some(data) if status.is_success() && envelope.status == "success" => data,
            _ => {
                return Err(ProviderError::Rejected {
                    provider: PROVIDER,
                    message: message_text(&envelope.message),
                })
            }
        };

        if let Some(tx_ref) = data.tx_ref.as_deref() {
            if tx_ref != reference {
                return Err(ProviderError::MalformedResponse {
                    provider: PROVIDER,
                    message: format!("asked for '{}', got '{}'", reference, tx_ref),
                });
            }
        }

        let verified = match data.status.to_ascii_lowercase().as_str() {
            "success" => VerifiedStatus::Success,
            "failed" | "cancelled" | "canceled" => VerifiedStatus::Failed,
            "pending" => VerifiedStatus::Pending,
            other => {
                return Err(ProviderError::MalformedResponse {
                    provider: PROVIDER,
                    message: format!("unknown transaction status '{}'", other),
                })
            }
        };

        info!(reference = %reference, status = %data.status, "Chapa transaction verified");

        Ok(Verification {
            status: verified,
            excerpt: json!({
                "provider": PROVIDER,
                "status": data.status,
                "amount": data.amount,
                "currency": data.currency,
                "provider_reference": data.reference,
            }),
        })
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> Option<bool> {
        let secret = self.config.webhook_secret.as_deref()?;

        let Ok(provided) = hex::decode(signature.trim()) else {
            return Some(false);
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return Some(false);
        };
        mac.update(payload);

        // verify_slice compares in constant time
        Some(mac.verify_slice(&provided).is_ok())
    }
}

fn message_text(message: &serde_json::Value) -> String {
    match message {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => "no message".to_string(),
        other => other.to_string(),
    }
}

// Chapa wraps every answer in {message, status, data}
#[derive(Debug, Deserialize)]
struct ChapaEnvelope<T> {
    #[serde(default)]
    message: serde_json::Value,
    #[serde(default)]
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    checkout_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    #[serde(default)]
    amount: serde_json::Value,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default)]
    tx_ref: Option<String>,
}
