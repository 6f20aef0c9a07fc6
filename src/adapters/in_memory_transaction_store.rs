//! In-process TransactionStore for local development and tests.
//!
//! Every operation runs under one mutex, which gives the same guarantees the
//! Postgres adapter gets from row locks: the pending check and the status
//! write happen atomically, and wallet credits never interleave.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::{Transaction, TransactionStatus};
use crate::ports::{
    ensure_terminal_target, PendingCursor, StoreError, StoreResult, TransactionStore,
};

#[derive(Default)]
struct Tables {
    transactions: HashMap<String, Transaction>,
    wallets: HashMap<String, BigDecimal>,
}

#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance, if the user has ever been credited.
    pub fn balance(&self, user_id: &str) -> Option<BigDecimal> {
        self.lock().ok()?.wallets.get(user_id).cloned()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
        let mut tables = self.lock()?;
        if tables.transactions.contains_key(&tx.reference) {
            return Err(StoreError::DuplicateReference(tx.reference.clone()));
        }
        tables
            .transactions
            .insert(tx.reference.clone(), tx.clone());
        Ok(tx.clone())
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        Ok(self.lock()?.transactions.get(reference).cloned())
    }

    async fn transition_from_pending(
        &self,
        reference: &str,
        to: TransactionStatus,
        metadata: serde_json::Value,
    ) -> StoreResult<Option<Transaction>> {
        ensure_terminal_target(to)?;

        let mut tables = self.lock()?;
        let Some(tx) = tables.transactions.get_mut(reference) else {
            return Ok(None);
        };
        if tx.status != TransactionStatus::Pending {
            return Ok(None);
        }

        tx.status = to;
        merge_metadata(&mut tx.metadata, metadata);
        tx.updated_at = Utc::now();
        Ok(Some(tx.clone()))
    }

    async fn credit_wallet(&self, user_id: &str, amount: &BigDecimal) -> StoreResult<BigDecimal> {
        let mut tables = self.lock()?;
        let balance = tables
            .wallets
            .entry(user_id.to_string())
            .or_insert_with(|| BigDecimal::from(0));
        *balance = &*balance + amount;
        Ok(balance.clone())
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.lock()?;
        let mut pending: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.created_at <= created_before)
            .filter(|tx| match after {
                Some(cursor) => (tx.created_at, tx.id) > (cursor.created_at, cursor.id),
                None => true,
            })
            .cloned()
            .collect();
        pending.sort_by_key(|tx| (tx.created_at, tx.id));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}

/// Shallow object merge, mirroring Postgres `jsonb || jsonb`.
fn merge_metadata(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            existing.extend(incoming);
        }
        (target, update) => *target = update,
    }
}
