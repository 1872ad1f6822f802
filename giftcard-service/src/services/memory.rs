//! In-process store with the same conditional-write contracts as Postgres.
//!
//! All tables live behind one async mutex, so each trait method is atomic
//! with respect to every other. Used for local runs and the test-suite.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{
    BusinessGiftCard, DefaultMode, GiftCardFilter, GiftCardGuard, GiftCardStatus, PaymentMethod,
    PersonalGiftCard, PersonalGiftCardStatus, RemovalOutcome, SummaryBucket, Transaction,
    TransactionFilter, TransactionPage, Wallet,
};
use crate::services::error::ServiceError;
use crate::services::store::{
    GiftCardStore, HealthCheck, LedgerEntryWrite, LedgerWrite, PaymentMethodStore,
    PersonalGiftCardStore, StoreResult, WalletStore,
};

#[derive(Default)]
struct Tables {
    wallets: HashMap<Uuid, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    payment_methods: HashMap<Uuid, PaymentMethod>,
    gift_cards: HashMap<Uuid, BusinessGiftCard>,
    personal_cards: HashMap<Uuid, PersonalGiftCard>,
}

impl Tables {
    fn live_gift_cards(&self) -> impl Iterator<Item = &BusinessGiftCard> {
        self.gift_cards
            .values()
            .filter(|c| c.status != GiftCardStatus::Deleted)
    }

    fn clear_defaults(&mut self, wallet_id: Uuid, now: DateTime<Utc>) {
        for method in self
            .payment_methods
            .values_mut()
            .filter(|m| m.wallet_id == wallet_id && m.is_default)
        {
            method.is_default = false;
            method.updated_utc = now;
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .wallets
            .values()
            .any(|w| w.business_id == wallet.business_id)
        {
            return Err(ServiceError::Conflict(format!(
                "Wallet already exists for business {}",
                wallet.business_id
            )));
        }
        tables.wallets.insert(wallet.wallet_id, wallet.clone());
        Ok(())
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        Ok(self.tables.lock().await.wallets.get(&wallet_id).cloned())
    }

    async fn find_wallet_by_business(&self, business_id: Uuid) -> StoreResult<Option<Wallet>> {
        Ok(self
            .tables
            .lock()
            .await
            .wallets
            .values()
            .find(|w| w.business_id == business_id)
            .cloned())
    }

    async fn update_wallet(&self, wallet: &Wallet, expected_version: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.wallets.get_mut(&wallet.wallet_id) {
            Some(stored) if stored.version == expected_version => {
                *stored = wallet.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit_ledger_write(&self, write: &LedgerWrite) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;

        let version_matches = tables
            .wallets
            .get(&write.wallet.wallet_id)
            .is_some_and(|w| w.version == write.expected_version);
        if !version_matches {
            return Ok(false);
        }

        match &write.entry {
            LedgerEntryWrite::Insert(transaction) => {
                tables
                    .transactions
                    .insert(transaction.transaction_id, transaction.clone());
            }
            LedgerEntryWrite::Settle { transaction, from } => {
                match tables.transactions.get_mut(&transaction.transaction_id) {
                    Some(stored) if stored.status == *from => *stored = transaction.clone(),
                    _ => return Ok(false),
                }
            }
        }

        tables
            .wallets
            .insert(write.wallet.wallet_id, write.wallet.clone());
        Ok(true)
    }

    async fn find_transaction(&self, transaction_id: Uuid) -> StoreResult<Option<Transaction>> {
        Ok(self
            .tables
            .lock()
            .await
            .transactions
            .get(&transaction_id)
            .cloned())
    }

    async fn list_transactions(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> StoreResult<TransactionPage> {
        let tables = self.tables.lock().await;
        let mut matching: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.wallet_id == wallet_id && filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_utc
                .cmp(&a.created_utc)
                .then(b.transaction_id.cmp(&a.transaction_id))
        });

        let total_count = matching.len() as i64;
        let transactions = matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.page_size() as usize)
            .collect();

        Ok(TransactionPage {
            transactions,
            total_count,
        })
    }
}

#[async_trait]
impl PaymentMethodStore for MemoryStore {
    async fn insert_payment_method(
        &self,
        method: &PaymentMethod,
        mode: DefaultMode,
    ) -> StoreResult<PaymentMethod> {
        let mut tables = self.tables.lock().await;
        let mut stored = method.clone();

        match mode {
            DefaultMode::Replace => {
                tables.clear_defaults(method.wallet_id, method.updated_utc);
                stored.is_default = true;
            }
            DefaultMode::IfNone => {
                stored.is_default = !tables
                    .payment_methods
                    .values()
                    .any(|m| m.wallet_id == method.wallet_id && m.is_default && m.is_active);
            }
        }

        tables
            .payment_methods
            .insert(stored.payment_method_id, stored.clone());
        Ok(stored)
    }

    async fn find_payment_method(
        &self,
        payment_method_id: Uuid,
    ) -> StoreResult<Option<PaymentMethod>> {
        Ok(self
            .tables
            .lock()
            .await
            .payment_methods
            .get(&payment_method_id)
            .cloned())
    }

    async fn list_payment_methods(&self, wallet_id: Uuid) -> StoreResult<Vec<PaymentMethod>> {
        let tables = self.tables.lock().await;
        let mut methods: Vec<PaymentMethod> = tables
            .payment_methods
            .values()
            .filter(|m| m.wallet_id == wallet_id && m.is_active)
            .cloned()
            .collect();
        methods.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(methods)
    }

    async fn set_default_payment_method(
        &self,
        wallet_id: Uuid,
        payment_method_id: Uuid,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let eligible = tables
            .payment_methods
            .get(&payment_method_id)
            .is_some_and(|m| m.wallet_id == wallet_id && m.is_active);
        if !eligible {
            return Ok(false);
        }

        let now = Utc::now();
        tables.clear_defaults(wallet_id, now);
        if let Some(method) = tables.payment_methods.get_mut(&payment_method_id) {
            method.is_default = true;
            method.updated_utc = now;
        }
        Ok(true)
    }

    async fn remove_payment_method(
        &self,
        wallet_id: Uuid,
        payment_method_id: Uuid,
    ) -> StoreResult<RemovalOutcome> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();

        let removed = match tables.payment_methods.get_mut(&payment_method_id) {
            Some(method) if method.wallet_id == wallet_id && method.is_active => {
                method.is_active = false;
                method.updated_utc = now;
                let was_default = method.is_default;
                method.is_default = false;
                (method.clone(), was_default)
            }
            _ => return Ok(RemovalOutcome::NotFound),
        };

        let (removed, was_default) = removed;
        let promoted = if was_default {
            let candidate = tables
                .payment_methods
                .values()
                .filter(|m| m.wallet_id == wallet_id && m.is_active)
                .max_by_key(|m| m.created_utc)
                .map(|m| m.payment_method_id);

            candidate.and_then(|id| {
                tables.payment_methods.get_mut(&id).map(|m| {
                    m.is_default = true;
                    m.updated_utc = now;
                    m.clone()
                })
            })
        } else {
            None
        };

        Ok(RemovalOutcome::Removed { removed, promoted })
    }
}

#[async_trait]
impl GiftCardStore for MemoryStore {
    async fn insert_gift_card(&self, card: &BusinessGiftCard) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.live_gift_cards().any(|c| c.code == card.code) {
            return Err(ServiceError::Conflict(format!(
                "Gift card code '{}' already exists",
                card.code
            )));
        }
        tables.gift_cards.insert(card.gift_card_id, card.clone());
        Ok(())
    }

    async fn find_gift_card(&self, gift_card_id: Uuid) -> StoreResult<Option<BusinessGiftCard>> {
        Ok(self
            .tables
            .lock()
            .await
            .live_gift_cards()
            .find(|c| c.gift_card_id == gift_card_id)
            .cloned())
    }

    async fn find_gift_card_by_code(&self, code: &str) -> StoreResult<Option<BusinessGiftCard>> {
        Ok(self
            .tables
            .lock()
            .await
            .live_gift_cards()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list_gift_cards(
        &self,
        business_id: Uuid,
        filter: &GiftCardFilter,
    ) -> StoreResult<Vec<BusinessGiftCard>> {
        let tables = self.tables.lock().await;
        let mut cards: Vec<BusinessGiftCard> = tables
            .live_gift_cards()
            .filter(|c| c.business_id == business_id && filter.matches(c))
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(cards
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.page_size() as usize)
            .collect())
    }

    async fn update_gift_card(
        &self,
        card: &BusinessGiftCard,
        expected: &GiftCardGuard,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.gift_cards.get_mut(&card.gift_card_id) {
            Some(stored) if stored.status != GiftCardStatus::Deleted && stored.matches(expected) => {
                *stored = card.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_gift_cards(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut affected = 0;
        for card in tables
            .gift_cards
            .values_mut()
            .filter(|c| c.status == GiftCardStatus::Available && c.expires_at < now)
        {
            card.status = GiftCardStatus::Expired;
            card.updated_utc = now;
            affected += 1;
        }
        Ok(affected)
    }

    async fn gift_card_summary(&self, business_id: Uuid) -> StoreResult<Vec<SummaryBucket>> {
        let tables = self.tables.lock().await;
        let mut buckets: HashMap<_, SummaryBucket> = HashMap::new();

        for card in tables
            .live_gift_cards()
            .filter(|c| c.business_id == business_id)
        {
            let bucket = buckets
                .entry((card.status, card.sent_status))
                .or_insert_with(|| SummaryBucket {
                    status: card.status,
                    sent_status: card.sent_status,
                    card_count: 0,
                    face_value: Decimal::ZERO,
                    remaining_value: Decimal::ZERO,
                });
            bucket.card_count += 1;
            bucket.face_value += card.amount;
            bucket.remaining_value += card.remaining_amount;
        }

        Ok(buckets.into_values().collect())
    }
}

#[async_trait]
impl PersonalGiftCardStore for MemoryStore {
    async fn insert_personal_card(&self, card: &PersonalGiftCard) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.personal_cards.values().any(|c| c.code == card.code) {
            return Err(ServiceError::Conflict(format!(
                "Personal gift card code '{}' already exists",
                card.code
            )));
        }
        tables
            .personal_cards
            .insert(card.personal_gift_card_id, card.clone());
        Ok(())
    }

    async fn find_personal_card(&self, card_id: Uuid) -> StoreResult<Option<PersonalGiftCard>> {
        Ok(self.tables.lock().await.personal_cards.get(&card_id).cloned())
    }

    async fn find_personal_card_by_code(
        &self,
        code: &str,
    ) -> StoreResult<Option<PersonalGiftCard>> {
        Ok(self
            .tables
            .lock()
            .await
            .personal_cards
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn list_personal_cards_by_sender(
        &self,
        sender_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<PersonalGiftCard>> {
        let tables = self.tables.lock().await;
        let mut cards: Vec<PersonalGiftCard> = tables
            .personal_cards
            .values()
            .filter(|c| c.sender_id == sender_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(cards
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.clamp(1, 100) as usize)
            .collect())
    }

    async fn update_personal_card(
        &self,
        card: &PersonalGiftCard,
        expected: PersonalGiftCardStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        match tables.personal_cards.get_mut(&card.personal_gift_card_id) {
            Some(stored) if stored.status == expected => {
                *stored = card.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_personal_cards(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut affected = 0;
        for card in tables
            .personal_cards
            .values_mut()
            .filter(|c| c.status == PersonalGiftCardStatus::Active && c.expires_at < now)
        {
            card.status = PersonalGiftCardStatus::Expired;
            card.updated_utc = now;
            affected += 1;
        }
        Ok(affected)
    }
}
