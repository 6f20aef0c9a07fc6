//! Data store port consumed by the payment use cases.
//!
//! The reconciler only relies on four guarantees from a store: lookup by
//! reference, a status update guarded by the current status, an atomic wallet
//! increment, and durable inserts. Everything else is adapter detail.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("a transaction with reference '{0}' already exists")]
    DuplicateReference(String),

    #[error("illegal status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("stored row for '{reference}' is unreadable: {message}")]
    Corrupt { reference: String, message: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyset position in the pending listing, ordered by `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PendingCursor {
    pub fn after(tx: &Transaction) -> Self {
        Self {
            created_at: tx.created_at,
            id: tx.id,
        }
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a new transaction record.
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction>;

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>>;

    /// Move a `pending` row to `to`, merging `metadata` into the stored
    /// metadata.
    ///
    /// Returns `Ok(None)` when no row matched because it is missing or no
    /// longer pending. Exactly one concurrent caller can observe `Some`.
    async fn transition_from_pending(
        &self,
        reference: &str,
        to: TransactionStatus,
        metadata: serde_json::Value,
    ) -> StoreResult<Option<Transaction>>;

    /// Atomically add `amount` to the user's wallet balance and return the new
    /// balance. A wallet is created on first credit.
    async fn credit_wallet(&self, user_id: &str, amount: &BigDecimal) -> StoreResult<BigDecimal>;

    /// Pending rows created at or before `created_before`, ordered by
    /// `(created_at, id)` and starting strictly after `after` when given.
    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Shared guard for adapters: only pending rows may move, and only to a
/// terminal state.
pub(crate) fn ensure_terminal_target(to: TransactionStatus) -> StoreResult<()> {
    if TransactionStatus::Pending.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: TransactionStatus::Pending,
            to,
        })
    }
}
