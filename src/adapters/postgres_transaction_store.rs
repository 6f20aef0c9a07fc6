//! Postgres implementation of TransactionStore.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{PaymentMethod, Transaction, TransactionStatus};
use crate::ports::{
    ensure_terminal_target, PendingCursor, StoreError, StoreResult, TransactionStore,
};

const UNIQUE_VIOLATION: &str = "23505";

/// Postgres-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn insert(&self, tx: &Transaction) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (
                id, reference, user_id, amount, method, status, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, reference, user_id, amount, method, status, metadata, created_at, updated_at
            "#,
        )
        .bind(tx.id)
        .bind(&tx.reference)
        .bind(&tx.user_id)
        .bind(&tx.amount)
        .bind(tx.method.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.metadata)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::DuplicateReference(tx.reference.clone())
            }
            _ => StoreError::from(e),
        })?;

        row.into_domain()
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, reference, user_id, amount, method, status, metadata, created_at, updated_at
            FROM transactions WHERE reference = $1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn transition_from_pending(
        &self,
        reference: &str,
        to: TransactionStatus,
        metadata: serde_json::Value,
    ) -> StoreResult<Option<Transaction>> {
        ensure_terminal_target(to)?;

        // The status predicate makes this a compare-and-set: concurrent callers
        // serialize on the row lock and every loser matches zero rows.
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions
            SET status = $2,
                metadata = COALESCE(metadata, '{}'::jsonb) || $3,
                updated_at = NOW()
            WHERE reference = $1 AND status = 'pending'
            RETURNING id, reference, user_id, amount, method, status, metadata, created_at, updated_at
            "#,
        )
        .bind(reference)
        .bind(to.as_str())
        .bind(metadata)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn credit_wallet(&self, user_id: &str, amount: &BigDecimal) -> StoreResult<BigDecimal> {
        let balance = sqlx::query_scalar::<_, BigDecimal>(
            r#"
            INSERT INTO wallets (user_id, balance, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET balance = wallets.balance + EXCLUDED.balance, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn list_pending(
        &self,
        created_before: DateTime<Utc>,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, reference, user_id, amount, method, status, metadata, created_at, updated_at
            FROM transactions
            WHERE status = 'pending'
              AND created_at <= $1
              AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3))
            ORDER BY created_at ASC, id ASC
            LIMIT $4
            "#,
        )
        .bind(created_before)
        .bind(after.map(|cursor| cursor.created_at))
        .bind(after.map(|cursor| cursor.id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    user_id: String,
    amount: BigDecimal,
    method: String,
    status: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        let method = self
            .method
            .parse::<PaymentMethod>()
            .map_err(|message| StoreError::Corrupt {
                reference: self.reference.clone(),
                message,
            })?;
        let status = self
            .status
            .parse::<TransactionStatus>()
            .map_err(|message| StoreError::Corrupt {
                reference: self.reference.clone(),
                message,
            })?;

        Ok(Transaction {
            id: self.id,
            reference: self.reference,
            user_id: self.user_id,
            amount: self.amount,
            method,
            status,
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
