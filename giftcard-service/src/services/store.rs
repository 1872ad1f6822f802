//! Storage seam.
//!
//! Every mutating method is a conditional write: it states the state it
//! expects to find and reports whether that expectation still held. A `false`
//! return means the caller's read was stale and nothing was written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    BusinessGiftCard, DefaultMode, GiftCardFilter, GiftCardGuard, PaymentMethod,
    PersonalGiftCard, PersonalGiftCardStatus, RemovalOutcome, SummaryBucket, Transaction,
    TransactionFilter, TransactionPage, TransactionStatus, Wallet,
};
use crate::services::error::ServiceError;

pub type StoreResult<T> = Result<T, ServiceError>;

/// A wallet write and the ledger row that justifies it, applied together.
#[derive(Debug, Clone)]
pub struct LedgerWrite {
    /// New wallet state. Its `version` must be `expected_version + 1`.
    pub wallet: Wallet,
    pub expected_version: i64,
    pub entry: LedgerEntryWrite,
}

#[derive(Debug, Clone)]
pub enum LedgerEntryWrite {
    Insert(Transaction),
    /// Move an existing entry out of `from` into `transaction.status`.
    Settle {
        transaction: Transaction,
        from: TransactionStatus,
    },
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Fails with `Conflict` if the business already has a wallet.
    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()>;
    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>>;
    async fn find_wallet_by_business(&self, business_id: Uuid) -> StoreResult<Option<Wallet>>;
    /// Wallet-only write (status, verification) guarded on `expected_version`.
    async fn update_wallet(&self, wallet: &Wallet, expected_version: i64) -> StoreResult<bool>;
    /// All-or-nothing wallet + ledger row write guarded on the wallet version
    /// and, for settlements, the entry's prior status.
    async fn commit_ledger_write(&self, write: &LedgerWrite) -> StoreResult<bool>;
    async fn find_transaction(&self, transaction_id: Uuid) -> StoreResult<Option<Transaction>>;
    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> StoreResult<TransactionPage>;
}

#[async_trait]
pub trait PaymentMethodStore: Send + Sync {
    /// Insert and resolve `is_default` per `mode` in one atomic step.
    async fn insert_payment_method(
        &self,
        method: &PaymentMethod,
        mode: DefaultMode,
    ) -> StoreResult<PaymentMethod>;
    async fn find_payment_method(&self, payment_method_id: Uuid)
        -> StoreResult<Option<PaymentMethod>>;
    /// Active methods for the wallet, newest first.
    async fn list_payment_methods(&self, wallet_id: Uuid) -> StoreResult<Vec<PaymentMethod>>;
    /// Clear every other default of the wallet and set this one. `false` if
    /// the method is missing or inactive.
    async fn set_default_payment_method(
        &self,
        wallet_id: Uuid,
        payment_method_id: Uuid,
    ) -> StoreResult<bool>;
    /// Deactivate the method; if it was the default, promote the newest other
    /// active method.
    async fn remove_payment_method(
        &self,
        wallet_id: Uuid,
        payment_method_id: Uuid,
    ) -> StoreResult<RemovalOutcome>;
}

/// Business gift cards. Reads never return `deleted` cards.
#[async_trait]
pub trait GiftCardStore: Send + Sync {
    /// Fails with `Conflict` if a live card already uses the code.
    async fn insert_gift_card(&self, card: &BusinessGiftCard) -> StoreResult<()>;
    async fn find_gift_card(&self, gift_card_id: Uuid) -> StoreResult<Option<BusinessGiftCard>>;
    async fn find_gift_card_by_code(&self, code: &str) -> StoreResult<Option<BusinessGiftCard>>;
    async fn list_gift_cards(
        &self,
        business_id: Uuid,
        filter: &GiftCardFilter,
    ) -> StoreResult<Vec<BusinessGiftCard>>;
    async fn update_gift_card(
        &self,
        card: &BusinessGiftCard,
        expected: &GiftCardGuard,
    ) -> StoreResult<bool>;
    /// `available` cards with `expires_at < now` become `expired`.
    async fn expire_gift_cards(&self, now: DateTime<Utc>) -> StoreResult<u64>;
    async fn gift_card_summary(&self, business_id: Uuid) -> StoreResult<Vec<SummaryBucket>>;
}

#[async_trait]
pub trait PersonalGiftCardStore: Send + Sync {
    /// Fails with `Conflict` if the code is taken.
    async fn insert_personal_card(&self, card: &PersonalGiftCard) -> StoreResult<()>;
    async fn find_personal_card(&self, card_id: Uuid) -> StoreResult<Option<PersonalGiftCard>>;
    async fn find_personal_card_by_code(&self, code: &str)
        -> StoreResult<Option<PersonalGiftCard>>;
    async fn list_personal_cards_by_sender(
        &self,
        sender_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<PersonalGiftCard>>;
    async fn update_personal_card(
        &self,
        card: &PersonalGiftCard,
        expected: PersonalGiftCardStatus,
    ) -> StoreResult<bool>;
    /// `active` cards with `expires_at < now` become `expired`.
    async fn expire_personal_cards(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;
}

/// Everything the service needs from one backing store.
pub trait Store:
    WalletStore + PaymentMethodStore + GiftCardStore + PersonalGiftCardStore + HealthCheck
{
}

impl<T> Store for T where
    T: WalletStore + PaymentMethodStore + GiftCardStore + PersonalGiftCardStore + HealthCheck
{
}
