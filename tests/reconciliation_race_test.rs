mod common;

use bigdecimal::BigDecimal;
use parcel_payments::adapters::InMemoryTransactionStore;
use parcel_payments::domain::{PaymentMethod, TransactionStatus};
use parcel_payments::ports::TransactionStore;
use parcel_payments::providers::{ProviderRegistry, VerifiedStatus};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use common::{seed_pending, spawn_app, FakeProvider, USER_ID};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_notifications_credit_exactly_once() {
    let reference = "CHAPA-3f2a9c1b-1760600000001";
    let provider = FakeProvider::slow(VerifiedStatus::Success, Duration::from_millis(50));
    let store = InMemoryTransactionStore::new();
    let base_url = spawn_app(
        Arc::new(store.clone()),
        ProviderRegistry::new().with_provider(provider.clone()),
    )
    .await;
    seed_pending(&store, reference, 500, PaymentMethod::Chapa).await;

    let client = reqwest::Client::new();
    let requests = (0..10).map(|i| {
        let client = client.clone();
        let base_url = base_url.clone();
        tokio::spawn(async move {
            // Mix the provider's POST webhook with return-URL GET pings
            let res = if i % 2 == 0 {
                client
                    .post(format!("{}/payments/webhook", base_url))
                    .json(&json!({"tx_ref": reference}))
                    .send()
                    .await
            } else {
                client
                    .get(format!("{}/payments/webhook?tx_ref={}", base_url, reference))
                    .send()
                    .await
            }
            .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            res.json::<Value>().await.unwrap()
        })
    });

    let mut bodies = Vec::new();
    for handle in requests.collect::<Vec<_>>() {
        bodies.push(handle.await.unwrap());
    }

    assert!(bodies.iter().all(|body| body["verification"] == "success"));
    assert_eq!(store.balance(USER_ID), Some(BigDecimal::from(500)));

    let tx = store.find_by_reference(reference).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_references_each_credit_once() {
    let provider = FakeProvider::answering(VerifiedStatus::Success);
    let store = InMemoryTransactionStore::new();
    let base_url = spawn_app(
        Arc::new(store.clone()),
        ProviderRegistry::new().with_provider(provider),
    )
    .await;

    let references: Vec<String> = (0..5).map(|i| format!("CHAPA-3f2a9c1b-{}", i)).collect();
    for reference in &references {
        seed_pending(&store, reference, 100, PaymentMethod::Chapa).await;
    }

    let client = reqwest::Client::new();
    let mut handles = Vec::new();
    for reference in references.iter().chain(references.iter()) {
        let client = client.clone();
        let url = format!("{}/payments/webhook", base_url);
        let body = json!({"tx_ref": reference});
        handles.push(tokio::spawn(async move {
            client.post(url).json(&body).send().await.unwrap().status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(store.balance(USER_ID), Some(BigDecimal::from(500)));
}
