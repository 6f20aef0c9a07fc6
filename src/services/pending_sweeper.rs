use chrono::Utc;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::ports::{PendingCursor, StoreResult, TransactionStore};
use crate::use_cases::{Notification, NotificationChannel, ReconcilePayment};

#[derive(Debug, Clone)]
pub struct SweeperSettings {
    pub interval: Duration,
    /// Only rows older than this are swept, giving the provider's own
    /// notification a chance to arrive first.
    pub min_age: Duration,
    pub batch_size: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub examined: usize,
    pub resolved: usize,
    pub still_pending: usize,
    /// Where the next sweep resumes. `None` once the end of the pending
    /// rows was reached, so the next sweep starts over from the oldest.
    pub next_cursor: Option<PendingCursor>,
}

/// Runs the background sweep loop. Re-verifies stale pending transactions
/// through the same reconciler the webhook uses, so references whose
/// notifications were lost eventually settle.
pub async fn run_sweeper(
    store: Arc<dyn TransactionStore>,
    reconciler: Arc<ReconcilePayment>,
    settings: SweeperSettings,
) {
    info!(
        interval_secs = settings.interval.as_secs(),
        min_age_secs = settings.min_age.as_secs(),
        batch_size = settings.batch_size,
        "Pending transaction sweeper started"
    );

    let mut cursor = None;
    loop {
        match sweep_once(store.as_ref(), &reconciler, &settings, cursor).await {
            Ok(summary) => {
                if summary.examined > 0 {
                    info!(
                        examined = summary.examined,
                        resolved = summary.resolved,
                        still_pending = summary.still_pending,
                        wrapped = summary.next_cursor.is_none(),
                        "Sweep finished"
                    );
                } else {
                    debug!("No stale pending transactions");
                }
                cursor = summary.next_cursor;
            }
            Err(e) => {
                error!("Sweeper batch error: {}", e);
                cursor = None;
            }
        }

        sleep(settings.interval).await;
    }
}

/// Sweeps one batch of stale pending rows starting after `cursor`.
///
/// Rows that stay pending are stepped over, so a backlog of abandoned
/// checkouts at the head of the list cannot hide newer rows from later
/// sweeps.
pub async fn sweep_once(
    store: &dyn TransactionStore,
    reconciler: &ReconcilePayment,
    settings: &SweeperSettings,
    cursor: Option<PendingCursor>,
) -> StoreResult<SweepSummary> {
    let min_age = chrono::Duration::from_std(settings.min_age)
        .unwrap_or_else(|_| chrono::Duration::seconds(0));
    let pending = store
        .list_pending(Utc::now() - min_age, cursor, settings.batch_size)
        .await?;

    let full_page = i64::try_from(pending.len()).unwrap_or(i64::MAX) >= settings.batch_size;
    let mut summary = SweepSummary {
        examined: pending.len(),
        next_cursor: if full_page {
            pending.last().map(PendingCursor::after)
        } else {
            None
        },
        ..Default::default()
    };

    for tx in pending {
        let outcome = reconciler
            .execute(Notification::new(tx.reference, NotificationChannel::Sweeper))
            .await;
        if outcome.transitioned() {
            summary.resolved += 1;
        } else {
            summary.still_pending += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransactionStore;
    use crate::domain::{PaymentMethod, Transaction, TransactionStatus};
    use crate::providers::{
        CheckoutRequest, CheckoutSession, PaymentProvider, ProviderError, ProviderRegistry,
        Verification, VerifiedStatus,
    };
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    struct SettledProvider;

    #[async_trait]
    impl PaymentProvider for SettledProvider {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Chapa
        }

        async fn create_checkout(
            &self,
            request: &CheckoutRequest,
        ) -> Result<CheckoutSession, ProviderError> {
            Ok(CheckoutSession {
                checkout_url: format!("https://pay.example/{}", request.reference),
            })
        }

        async fn verify(&self, _reference: &str) -> Result<Verification, ProviderError> {
            Ok(Verification {
                status: VerifiedStatus::Success,
                excerpt: json!({}),
            })
        }
    }

    fn settings(min_age_secs: u64) -> SweeperSettings {
        SweeperSettings {
            interval: Duration::from_secs(60),
            min_age: Duration::from_secs(min_age_secs),
            batch_size: 10,
        }
    }

    async fn store_with(rows: &[(&str, PaymentMethod)]) -> InMemoryTransactionStore {
        let store = InMemoryTransactionStore::new();
        for (reference, method) in rows {
            store
                .insert(&Transaction::new_pending(
                    reference.to_string(),
                    "user-1".to_string(),
                    BigDecimal::from(100),
                    *method,
                    json!({}),
                ))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn sweep_resolves_stale_pending_rows() {
        let store = store_with(&[
            ("CHAPA-a-1", PaymentMethod::Chapa),
            ("CHAPA-a-2", PaymentMethod::Chapa),
            ("YENEPAY-a-3", PaymentMethod::Yenepay),
        ])
        .await;
        let reconciler = ReconcilePayment::new(
            Arc::new(store.clone()),
            ProviderRegistry::new().with_provider(Arc::new(SettledProvider)),
        );

        let summary = sweep_once(&store, &reconciler, &settings(0), None)
            .await
            .unwrap();

        assert_eq!(
            summary,
            SweepSummary {
                examined: 3,
                resolved: 2,
                still_pending: 1,
                next_cursor: None,
            }
        );
        assert_eq!(store.balance("user-1"), Some(BigDecimal::from(200)));

        let yenepay = store.find_by_reference("YENEPAY-a-3").await.unwrap().unwrap();
        assert_eq!(yenepay.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn sweep_skips_fresh_rows() {
        let store = store_with(&[("CHAPA-a-1", PaymentMethod::Chapa)]).await;
        let reconciler = ReconcilePayment::new(
            Arc::new(store.clone()),
            ProviderRegistry::new().with_provider(Arc::new(SettledProvider)),
        );

        let summary = sweep_once(&store, &reconciler, &settings(300), None)
            .await
            .unwrap();

        assert_eq!(summary.examined, 0);
        assert_eq!(store.balance("user-1"), None);
    }

    #[tokio::test]
    async fn unresolvable_rows_do_not_starve_newer_ones() {
        let store = store_with(&[("YENEPAY-a-1", PaymentMethod::Yenepay)]).await;
        // Keep creation times strictly ordered
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .insert(&Transaction::new_pending(
                "CHAPA-a-2".to_string(),
                "user-1".to_string(),
                BigDecimal::from(100),
                PaymentMethod::Chapa,
                json!({}),
            ))
            .await
            .unwrap();
        let reconciler = ReconcilePayment::new(
            Arc::new(store.clone()),
            ProviderRegistry::new().with_provider(Arc::new(SettledProvider)),
        );
        let settings = SweeperSettings {
            batch_size: 1,
            ..settings(0)
        };

        let first = sweep_once(&store, &reconciler, &settings, None).await.unwrap();
        assert_eq!(first.still_pending, 1);
        assert!(first.next_cursor.is_some());

        let second = sweep_once(&store, &reconciler, &settings, first.next_cursor)
            .await
            .unwrap();
        assert_eq!(second.resolved, 1);

        let chapa = store.find_by_reference("CHAPA-a-2").await.unwrap().unwrap();
        assert_eq!(chapa.status, TransactionStatus::Completed);
        assert_eq!(store.balance("user-1"), Some(BigDecimal::from(100)));

        // Past the end, the next sweep starts over from the oldest row
        let third = sweep_once(&store, &reconciler, &settings, second.next_cursor)
            .await
            .unwrap();
        let fourth = sweep_once(&store, &reconciler, &settings, third.next_cursor)
            .await
            .unwrap();
        assert_eq!(third.examined + fourth.examined, 1);
    }
}
