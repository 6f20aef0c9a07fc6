//! Reconcile payment use case.
//!
//! Drives one reference through the verification state machine:
//! re-verify with the provider, move `pending` to a terminal status with a
//! guarded write, and credit the wallet only when this invocation's write won.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{PaymentMethod, Transaction, TransactionStatus};
use crate::ports::TransactionStore;
use crate::providers::{ProviderRegistry, VerifiedStatus};

/// Where a reconciliation request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationChannel {
    /// GET ping on the callback or return URL.
    Callback,
    /// POST webhook from the provider.
    Webhook,
    /// Background sweep of stale pending rows.
    Sweeper,
    /// Operator CLI.
    Operator,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Callback => "callback",
            NotificationChannel::Webhook => "webhook",
            NotificationChannel::Sweeper => "sweeper",
            NotificationChannel::Operator => "operator",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the webhook signature check. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Invalid,
    Absent,
    NotConfigured,
}

impl SignatureCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureCheck::Valid => "valid",
            SignatureCheck::Invalid => "invalid",
            SignatureCheck::Absent => "absent",
            SignatureCheck::NotConfigured => "not_configured",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub reference: String,
    pub channel: NotificationChannel,
    /// Provider name claimed by the notifier, e.g. the `source` query param.
    pub source_hint: Option<String>,
    pub signature: SignatureCheck,
}

impl Notification {
    pub fn new(reference: impl Into<String>, channel: NotificationChannel) -> Self {
        Self {
            reference: reference.into(),
            channel,
            source_hint: None,
            signature: SignatureCheck::Absent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// This invocation completed the transaction and credited the wallet.
    Credited { balance: BigDecimal },
    /// This invocation completed the transaction but the credit failed.
    CreditFailed,
    AlreadyCompleted,
    MarkedFailed,
    AlreadyFailed,
    /// The provider still reports the payment as pending.
    StillPending,
    /// No provider integration is registered for the stored method.
    ProviderNotConfigured,
    /// The provider could not give a definite answer.
    VerificationError,
    UnknownReference,
    StoreUnavailable,
}

impl ReconcileOutcome {
    /// Label reported back to the notifier.
    pub fn verification(&self) -> &'static str {
        match self {
            ReconcileOutcome::Credited { .. }
            | ReconcileOutcome::CreditFailed
            | ReconcileOutcome::AlreadyCompleted => "success",
            ReconcileOutcome::MarkedFailed | ReconcileOutcome::AlreadyFailed => "failed",
            ReconcileOutcome::StillPending | ReconcileOutcome::ProviderNotConfigured => "pending",
            ReconcileOutcome::VerificationError
            | ReconcileOutcome::UnknownReference
            | ReconcileOutcome::StoreUnavailable => "error",
        }
    }

    /// True when this call moved the transaction to a terminal state.
    pub fn transitioned(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Credited { .. }
                | ReconcileOutcome::CreditFailed
                | ReconcileOutcome::MarkedFailed
        )
    }
}

pub struct ReconcilePayment {
    store: Arc<dyn TransactionStore>,
    providers: ProviderRegistry,
}

impl ReconcilePayment {
    pub fn new(store: Arc<dyn TransactionStore>, providers: ProviderRegistry) -> Self {
        Self { store, providers }
    }

    #[tracing::instrument(
        name = "reconcile",
        skip(self, notification),
        fields(reference = %notification.reference, channel = %notification.channel)
    )]
    pub async fn execute(&self, notification: Notification) -> ReconcileOutcome {
        let tx = match self.store.find_by_reference(&notification.reference).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                warn!(
                    source = ?notification.source_hint,
                    "Notification for unknown reference ignored"
                );
                return ReconcileOutcome::UnknownReference;
            }
            Err(e) => {
                error!(error = %e, "Failed to load transaction");
                return ReconcileOutcome::StoreUnavailable;
            }
        };

        match tx.status {
            TransactionStatus::Completed => return ReconcileOutcome::AlreadyCompleted,
            TransactionStatus::Failed => return ReconcileOutcome::AlreadyFailed,
            TransactionStatus::Pending => {}
        }

        if let Some(hint) = notification.source_hint.as_deref() {
            if hint.parse::<PaymentMethod>().ok() != Some(tx.method) {
                warn!(
                    source = %hint,
                    method = %tx.method,
                    "Notification source does not match the transaction's method"
                );
            }
        }

        let Some(provider) = self.providers.get(tx.method) else {
            warn!(method = %tx.method, "No provider registered; leaving transaction pending");
            return ReconcileOutcome::ProviderNotConfigured;
        };

        let verification = match provider.verify(&tx.reference).await {
            Ok(verification) => verification,
            Err(e) => {
                warn!(method = %tx.method, error = %e, "Verification failed; leaving transaction pending");
                return ReconcileOutcome::VerificationError;
            }
        };

        let target = match verification.status {
            VerifiedStatus::Success => TransactionStatus::Completed,
            VerifiedStatus::Failed => TransactionStatus::Failed,
            VerifiedStatus::Pending => {
                info!("Provider reports payment still pending");
                return ReconcileOutcome::StillPending;
            }
        };

        let metadata = json!({
            "verified_at": Utc::now().to_rfc3339(),
            "verified_via": notification.channel.as_str(),
            "signature": notification.signature.as_str(),
            "verification": verification.excerpt,
        });

        let updated = match self
            .store
            .transition_from_pending(&tx.reference, target, metadata)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                error!(to = %target, error = %e, "Failed to record verified status");
                return ReconcileOutcome::StoreUnavailable;
            }
        };

        let Some(updated) = updated else {
            // Another invocation won the guarded write.
            return self.settled_elsewhere(&tx.reference).await;
        };

        if updated.status == TransactionStatus::Failed {
            info!(user_id = %updated.user_id, amount = %updated.amount, "Payment marked failed");
            return ReconcileOutcome::MarkedFailed;
        }

        self.credit(&updated).await
    }

    async fn credit(&self, tx: &Transaction) -> ReconcileOutcome {
        match self.store.credit_wallet(&tx.user_id, &tx.amount).await {
            Ok(balance) => {
                info!(
                    user_id = %tx.user_id,
                    amount = %tx.amount,
                    balance = %balance,
                    "Payment completed and wallet credited"
                );
                ReconcileOutcome::Credited { balance }
            }
            Err(e) => {
                error!(
                    reference = %tx.reference,
                    user_id = %tx.user_id,
                    amount = %tx.amount,
                    error = %e,
                    reconciliation_required = true,
                    "CRITICAL: transaction completed but wallet credit failed"
                );
                ReconcileOutcome::CreditFailed
            }
        }
    }

    async fn settled_elsewhere(&self, reference: &str) -> ReconcileOutcome {
        match self.store.find_by_reference(reference).await {
            Ok(Some(tx)) if tx.status == TransactionStatus::Completed => {
                info!("Transaction already completed by a concurrent notification");
                ReconcileOutcome::AlreadyCompleted
            }
            Ok(Some(tx)) if tx.status == TransactionStatus::Failed => {
                ReconcileOutcome::AlreadyFailed
            }
            Ok(_) => ReconcileOutcome::StoreUnavailable,
            Err(e) => {
                error!(error = %e, "Failed to reload transaction after lost update");
                ReconcileOutcome::StoreUnavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransactionStore;
    use crate::ports::{PendingCursor, StoreError, StoreResult};
    use crate::providers::{
        CheckoutRequest, CheckoutSession, PaymentProvider, ProviderError, Verification,
    };
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        answer: Option<VerifiedStatus>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn answering(answer: VerifiedStatus) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(answer),
                calls: AtomicUsize::new(0),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentProvider for ScriptedProvider {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Chapa
        }

        async fn create_checkout(
            &self,
            _request: &CheckoutRequest,
        ) -> Result<CheckoutSession, ProviderError> {
            unreachable!("reconciliation never opens checkouts")
        }

        async fn verify(&self, reference: &str) -> Result<Verification, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match self.answer {
                Some(status) => Ok(Verification {
                    status,
                    excerpt: json!({"provider": "chapa", "tx_ref": reference}),
                }),
                None => Err(ProviderError::CircuitOpen { provider: "chapa" }),
            }
        }
    }

    /// Delegates to the in-memory store but refuses every wallet credit.
    struct CreditlessStore(InMemoryTransactionStore);

    #[async_trait]
    impl TransactionStore for CreditlessStore {
        async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
            self.0.insert(tx).await
        }
        async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
            self.0.find_by_reference(reference).await
        }
        async fn transition_from_pending(
            &self,
            reference: &str,
            to: TransactionStatus,
            metadata: serde_json::Value,
        ) -> StoreResult<Option<Transaction>> {
            self.0.transition_from_pending(reference, to, metadata).await
        }
        async fn credit_wallet(&self, _user_id: &str, _amount: &BigDecimal) -> StoreResult<BigDecimal> {
            Err(StoreError::Unavailable("wallet table locked".to_string()))
        }
        async fn list_pending(
            &self,
            created_before: DateTime<Utc>,
            after: Option<PendingCursor>,
            limit: i64,
        ) -> StoreResult<Vec<Transaction>> {
            self.0.list_pending(created_before, after, limit).await
        }
        async fn ping(&self) -> StoreResult<()> {
            self.0.ping().await
        }
    }

    async fn seeded_store(reference: &str, method: PaymentMethod) -> InMemoryTransactionStore {
        let store = InMemoryTransactionStore::new();
        store
            .insert(&Transaction::new_pending(
                reference.to_string(),
                "user-1".to_string(),
                BigDecimal::from(500),
                method,
                json!({"provider": method.as_str()}),
            ))
            .await
            .unwrap();
        store
    }

    fn reconciler(
        store: &InMemoryTransactionStore,
        provider: Arc<ScriptedProvider>,
    ) -> ReconcilePayment {
        ReconcilePayment::new(
            Arc::new(store.clone()),
            ProviderRegistry::new().with_provider(provider),
        )
    }

    fn webhook(reference: &str) -> Notification {
        Notification::new(reference, NotificationChannel::Webhook)
    }

    #[tokio::test]
    async fn success_completes_and_credits_once() {
        let store = seeded_store("ref-1", PaymentMethod::Chapa).await;
        let provider = ScriptedProvider::answering(VerifiedStatus::Success);
        let reconciler = reconciler(&store, provider.clone());

        let first = reconciler.execute(webhook("ref-1")).await;
        assert_eq!(
            first,
            ReconcileOutcome::Credited {
                balance: BigDecimal::from(500)
            }
        );
        assert_eq!(first.verification(), "success");

        for _ in 0..3 {
            let again = reconciler.execute(webhook("ref-1")).await;
            assert_eq!(again, ReconcileOutcome::AlreadyCompleted);
            assert_eq!(again.verification(), "success");
        }

        assert_eq!(store.balance("user-1"), Some(BigDecimal::from(500)));
        // Terminal rows short-circuit before the provider is asked again.
        assert_eq!(provider.calls(), 1);

        let stored = store.find_by_reference("ref-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(stored.metadata["provider"], "chapa");
        assert_eq!(stored.metadata["verified_via"], "webhook");
    }

    #[tokio::test]
    async fn concurrent_notifications_credit_once() {
        let store = seeded_store("ref-race", PaymentMethod::Chapa).await;
        let reconciler = Arc::new(reconciler(
            &store,
            ScriptedProvider::answering(VerifiedStatus::Success),
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let reconciler = reconciler.clone();
                tokio::spawn(async move { reconciler.execute(webhook("ref-race")).await })
            })
            .collect();

        let mut credited = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.verification(), "success");
            if matches!(outcome, ReconcileOutcome::Credited { .. }) {
                credited += 1;
            }
        }

        assert_eq!(credited, 1);
        assert_eq!(store.balance("user-1"), Some(BigDecimal::from(500)));
    }

    #[tokio::test]
    async fn failed_verification_marks_failed_without_credit() {
        let store = seeded_store("ref-f", PaymentMethod::Chapa).await;
        let reconciler = reconciler(&store, ScriptedProvider::answering(VerifiedStatus::Failed));

        let outcome = reconciler.execute(webhook("ref-f")).await;

        assert_eq!(outcome, ReconcileOutcome::MarkedFailed);
        assert_eq!(outcome.verification(), "failed");
        assert_eq!(store.balance("user-1"), None);
    }

    #[tokio::test]
    async fn terminal_failed_row_is_never_completed() {
        let store = seeded_store("ref-t", PaymentMethod::Chapa).await;
        store
            .transition_from_pending("ref-t", TransactionStatus::Failed, json!({}))
            .await
            .unwrap();
        let provider = ScriptedProvider::answering(VerifiedStatus::Success);
        let reconciler = reconciler(&store, provider.clone());

        let outcome = reconciler.execute(webhook("ref-t")).await;

        assert_eq!(outcome, ReconcileOutcome::AlreadyFailed);
        assert_eq!(provider.calls(), 0);
        assert_eq!(store.balance("user-1"), None);
        let stored = store.find_by_reference("ref-t").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_reference_is_ignored() {
        let store = InMemoryTransactionStore::new();
        let provider = ScriptedProvider::answering(VerifiedStatus::Success);
        let reconciler = reconciler(&store, provider.clone());

        let outcome = reconciler.execute(webhook("nope")).await;

        assert_eq!(outcome, ReconcileOutcome::UnknownReference);
        assert_eq!(outcome.verification(), "error");
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn indeterminate_answers_leave_row_pending() {
        let store = seeded_store("ref-p", PaymentMethod::Chapa).await;

        let still_pending = reconciler(&store, ScriptedProvider::answering(VerifiedStatus::Pending))
            .execute(webhook("ref-p"))
            .await;
        assert_eq!(still_pending, ReconcileOutcome::StillPending);
        assert_eq!(still_pending.verification(), "pending");

        let unreachable = reconciler(&store, ScriptedProvider::unreachable())
            .execute(webhook("ref-p"))
            .await;
        assert_eq!(unreachable, ReconcileOutcome::VerificationError);
        assert_eq!(unreachable.verification(), "error");

        let stored = store.find_by_reference("ref-p").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);

        // A later definite answer still resolves it.
        let resolved = reconciler(&store, ScriptedProvider::answering(VerifiedStatus::Success))
            .execute(webhook("ref-p"))
            .await;
        assert!(matches!(resolved, ReconcileOutcome::Credited { .. }));
    }

    #[tokio::test]
    async fn unimplemented_provider_is_indeterminate() {
        let store = seeded_store("TELEBIRR-user1-1", PaymentMethod::Telebirr).await;
        let reconciler = reconciler(&store, ScriptedProvider::answering(VerifiedStatus::Success));

        let outcome = reconciler.execute(webhook("TELEBIRR-user1-1")).await;

        assert_eq!(outcome, ReconcileOutcome::ProviderNotConfigured);
        assert_eq!(outcome.verification(), "pending");
        assert_eq!(store.balance("user-1"), None);
    }

    #[tokio::test]
    async fn dispatch_uses_stored_method_not_source_hint() {
        let store = seeded_store("ref-h", PaymentMethod::Chapa).await;
        let provider = ScriptedProvider::answering(VerifiedStatus::Success);
        let reconciler = reconciler(&store, provider.clone());

        let mut notification = Notification::new("ref-h", NotificationChannel::Callback);
        notification.source_hint = Some("yenepay".to_string());
        let outcome = reconciler.execute(notification).await;

        assert!(matches!(outcome, ReconcileOutcome::Credited { .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn credit_failure_after_completion_is_reported_as_success() {
        let inner = seeded_store("ref-c", PaymentMethod::Chapa).await;
        let reconciler = ReconcilePayment::new(
            Arc::new(CreditlessStore(inner.clone())),
            ProviderRegistry::new()
                .with_provider(ScriptedProvider::answering(VerifiedStatus::Success)),
        );

        let outcome = reconciler.execute(webhook("ref-c")).await;

        assert_eq!(outcome, ReconcileOutcome::CreditFailed);
        assert_eq!(outcome.verification(), "success");
        assert!(outcome.transitioned());
        let stored = inner.find_by_reference("ref-c").await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert_eq!(inner.balance("user-1"), None);
    }
}
