//! Append-only wallet ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ledger entry type. Credits add to the balance; debits and refunds draw it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
    Refund,
}

string_enum!(TransactionType, "transaction type", {
    Credit => "credit",
    Debit => "debit",
    Refund => "refund",
});

impl TransactionType {
    pub fn is_outflow(self) -> bool {
        matches!(self, Self::Debit | Self::Refund)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(TransactionStatus, "transaction status", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl TransactionStatus {
    /// Only pending entries may settle; every other status is final.
    pub fn can_settle_to(self, outcome: TransactionStatus) -> bool {
        use TransactionStatus::*;

        match (self, outcome) {
            (Pending, Completed | Failed | Cancelled) => true,
            (Pending, Pending) => false,
            (Completed | Failed | Cancelled, _) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub wallet_id: Uuid,
    /// Always positive; direction comes from `transaction_type`.
    pub amount: Decimal,
    #[sqlx(try_from = "String")]
    pub transaction_type: TransactionType,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    pub reference_id: Option<String>,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Caller-supplied context attached to a ledger entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub reference_id: Option<String>,
    pub description: Option<String>,
}

impl TransactionMeta {
    pub fn new(reference_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            reference_id: Some(reference_id.into()),
            description: Some(description.into()),
        }
    }
}

/// Filters for transaction history. Results are newest first.
#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            transaction_type: None,
            status: None,
            created_from: None,
            created_to: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TransactionFilter {
    /// Limit clamped to 1..=100.
    pub fn page_size(&self) -> i64 {
        self.limit.clamp(1, 100)
    }

    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.transaction_type
            .map_or(true, |t| t == transaction.transaction_type)
            && self.status.map_or(true, |s| s == transaction.status)
            && self
                .created_from
                .map_or(true, |from| transaction.created_utc >= from)
            && self.created_to.map_or(true, |to| transaction.created_utc <= to)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total_count: i64,
}
