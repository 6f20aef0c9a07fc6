//! Transaction domain entity.
//! Framework-agnostic representation of a wallet deposit and its lifecycle.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of user id characters embedded in a generated reference.
const REFERENCE_USER_PREFIX_LEN: usize = 8;
const REFERENCE_NONCE_LEN: usize = 6;

/// Payment providers a deposit can be made through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Chapa,
    Telebirr,
    Yenepay,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 3] = [
        PaymentMethod::Chapa,
        PaymentMethod::Telebirr,
        PaymentMethod::Yenepay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Chapa => "chapa",
            PaymentMethod::Telebirr => "telebirr",
            PaymentMethod::Yenepay => "yenepay",
        }
    }

    fn reference_prefix(&self) -> &'static str {
        match self {
            PaymentMethod::Chapa => "CHAPA",
            PaymentMethod::Telebirr => "TELEBIRR",
            PaymentMethod::Yenepay => "YENEPAY",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "chapa" => Ok(PaymentMethod::Chapa),
            "telebirr" => Ok(PaymentMethod::Telebirr),
            "yenepay" => Ok(PaymentMethod::Yenepay),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

/// Lifecycle status of a transaction.
///
/// `Pending` is the only non-terminal state. The only legal moves are
/// `Pending -> Completed` and `Pending -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// Domain entity representing a wallet deposit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub user_id: String,
    pub amount: BigDecimal,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new_pending(
        reference: String,
        user_id: String,
        amount: BigDecimal,
        method: PaymentMethod,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference,
            user_id,
            amount,
            method,
            status: TransactionStatus::Pending,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Builds a provider-prefixed reference such as
/// `CHAPA-3f2a9c1b-1760600000000-9c41e2`.
///
/// The user id prefix and millisecond timestamp keep references readable; the
/// random suffix separates two requests from the same user in the same
/// millisecond.
pub fn generate_reference(method: PaymentMethod, user_id: &str, now: DateTime<Utc>) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    build_reference(method, user_id, now, &nonce[..REFERENCE_NONCE_LEN])
}

fn build_reference(
    method: PaymentMethod,
    user_id: &str,
    now: DateTime<Utc>,
    nonce: &str,
) -> String {
    let user_part: String = user_id
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .take(REFERENCE_USER_PREFIX_LEN)
        .collect();

    format!(
        "{}-{}-{}-{}",
        method.reference_prefix(),
        user_part,
        now.timestamp_millis(),
        nonce
    )
}
