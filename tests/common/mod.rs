#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use parcel_payments::adapters::InMemoryTransactionStore;
use parcel_payments::domain::{PaymentMethod, Transaction};
use parcel_payments::ports::TransactionStore;
use parcel_payments::providers::{
    CheckoutRequest, CheckoutSession, PaymentProvider, ProviderError, ProviderRegistry,
    Verification, VerifiedStatus,
};
use parcel_payments::use_cases::InitiationSettings;
use parcel_payments::{create_app, AppState};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

pub const USER_ID: &str = "3f2a9c1b-77aa-4b1e-9d3c-0c1f2e3d4a5b";

/// Provider double whose verification answer can be changed between calls.
pub struct FakeProvider {
    answer: Mutex<Option<VerifiedStatus>>,
    verify_calls: AtomicUsize,
    delay: Duration,
}

impl FakeProvider {
    pub fn answering(answer: VerifiedStatus) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(answer)),
            verify_calls: AtomicUsize::new(0),
            delay: Duration::from_millis(0),
        })
    }

    /// Slow verification widens the window for racing notifications.
    pub fn slow(answer: VerifiedStatus, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(answer)),
            verify_calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn set_answer(&self, answer: Option<VerifiedStatus>) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Chapa
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        Ok(CheckoutSession {
            checkout_url: format!("https://checkout.chapa.co/checkout/payment/{}", request.reference),
        })
    }

    async fn verify(&self, reference: &str) -> Result<Verification, ProviderError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let answer = *self.answer.lock().unwrap();
        match answer {
            Some(status) => Ok(Verification {
                status,
                excerpt: json!({"provider": "chapa", "tx_ref": reference}),
            }),
            None => Err(ProviderError::CircuitOpen { provider: "chapa" }),
        }
    }
}

pub fn initiation_settings() -> InitiationSettings {
    InitiationSettings {
        currency: "ETB".to_string(),
        webhook_url: Url::parse("https://api.example.com/payments/webhook").unwrap(),
        return_url: Url::parse("https://app.example.com/wallet").unwrap(),
    }
}

/// Serves the app on an ephemeral port and returns its base URL.
pub async fn spawn_app(store: Arc<dyn TransactionStore>, providers: ProviderRegistry) -> String {
    let app = create_app(AppState::new(store, providers, initiation_settings()));

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let actual_addr = server.local_addr();

    tokio::spawn(async move {
        server.await.unwrap();
    });

    format!("http://{}", actual_addr)
}

pub async fn seed_pending(
    store: &InMemoryTransactionStore,
    reference: &str,
    amount: i64,
    method: PaymentMethod,
) -> Transaction {
    store
        .insert(&Transaction::new_pending(
            reference.to_string(),
            USER_ID.to_string(),
            BigDecimal::from(amount),
            method,
            json!({"provider": method.as_str()}),
        ))
        .await
        .unwrap()
}

pub fn deposit_body(amount: serde_json::Value, method: &str) -> serde_json::Value {
    json!({
        "amount": amount,
        "method": method,
        "user": {
            "id": USER_ID,
            "email": "abebe@example.com",
            "first_name": "Abebe",
            "last_name": "Kebede"
        }
    })
}
