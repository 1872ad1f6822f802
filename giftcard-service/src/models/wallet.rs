//! Business wallet model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Wallet lifecycle status. `Closed` is terminal; wallets are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Active,
    Suspended,
    Closed,
}

string_enum!(WalletStatus, "wallet status", {
    Active => "active",
    Suspended => "suspended",
    Closed => "closed",
});

/// Administrative wallet transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletTransition {
    Suspend,
    Reactivate,
    Close,
}

impl WalletStatus {
    /// Target status for `transition`, or `None` when it is not allowed.
    pub fn apply(self, transition: WalletTransition) -> Option<Self> {
        use WalletStatus::*;
        use WalletTransition as T;

        match (self, transition) {
            (Active, T::Suspend) => Some(Suspended),
            (Suspended, T::Reactivate) => Some(Active),
            (Active | Suspended, T::Close) => Some(Closed),
            (Suspended | Closed, T::Suspend) => None,
            (Active | Closed, T::Reactivate) => None,
            (Closed, T::Close) => None,
        }
    }
}

/// One wallet per business, fed only by the transaction ledger.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Wallet {
    pub wallet_id: Uuid,
    pub business_id: Uuid,
    pub owner_id: Uuid,
    pub balance: Decimal,
    pub total_income: Decimal,
    pub total_expenses: Decimal,
    pub pending_balance: Decimal,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: WalletStatus,
    pub is_verified: bool,
    /// Bumped on every write; guards optimistic updates.
    pub version: i64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Wallet {
    pub fn new(business_id: Uuid, owner_id: Uuid, currency: &str, now: DateTime<Utc>) -> Self {
        Self {
            wallet_id: Uuid::new_v4(),
            business_id,
            owner_id,
            balance: Decimal::ZERO,
            total_income: Decimal::ZERO,
            total_expenses: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            currency: currency.to_string(),
            status: WalletStatus::Active,
            is_verified: false,
            version: 0,
            created_utc: now,
            updated_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }

    /// Copy of this wallet as the next version, ready for a guarded write.
    pub fn next_version(&self, now: DateTime<Utc>) -> Self {
        Self {
            version: self.version + 1,
            updated_utc: now,
            ..self.clone()
        }
    }
}
