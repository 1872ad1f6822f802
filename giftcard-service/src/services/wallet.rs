//! Wallet ledger: the only component that moves wallet balances.
//!
//! Every balance change is a [`LedgerWrite`] guarded on the wallet version the
//! change was computed from. A lost race re-reads the wallet and recomputes,
//! up to `max_retries` times, then surfaces `Conflict`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    Transaction, TransactionFilter, TransactionMeta, TransactionPage, TransactionStatus,
    TransactionType, Wallet, WalletStatus, WalletTransition,
};
use crate::services::error::ServiceError;
use crate::services::metrics::{record_error, TRANSACTIONS_TOTAL};
use crate::services::store::{LedgerEntryWrite, LedgerWrite, Store};

/// Largest amount a `NUMERIC(14,2)` column holds: 999,999,999,999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

/// Money amounts are positive with at most two decimal places.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::InvalidInput(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(ServiceError::InvalidInput(format!(
            "Amount {} exceeds the maximum of {}",
            amount, MAX_AMOUNT
        )));
    }
    if amount.normalize().scale() > 2 {
        return Err(ServiceError::InvalidInput(format!(
            "Amount {} has more than two decimal places",
            amount
        )));
    }
    Ok(amount.round_dp(2))
}

fn validate_currency(currency: &str) -> Result<String, ServiceError> {
    let currency = currency.trim().to_ascii_uppercase();
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(currency)
    } else {
        Err(ServiceError::InvalidInput(format!(
            "Currency '{}' must be a three-letter ISO code",
            currency
        )))
    }
}

/// Wallet state after a completed entry of `amount` and `kind`.
fn apply_completed(
    wallet: &Wallet,
    amount: Decimal,
    kind: TransactionType,
    now: DateTime<Utc>,
) -> Result<Wallet, ServiceError> {
    let mut next = wallet.next_version(now);
    if kind.is_outflow() {
        if amount > wallet.balance {
            return Err(ServiceError::InsufficientFunds {
                requested: amount,
                available: wallet.balance,
            });
        }
        next.balance -= amount;
        next.total_expenses += amount;
    } else {
        next.balance += amount;
        next.total_income += amount;
    }
    Ok(next)
}

fn ensure_active(wallet: &Wallet) -> Result<(), ServiceError> {
    if wallet.is_active() {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(format!(
            "Wallet {} is {}",
            wallet.wallet_id, wallet.status
        )))
    }
}

pub struct WalletLedger {
    store: Arc<dyn Store>,
    max_retries: u32,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn Store>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    #[instrument(skip(self))]
    pub async fn create_wallet(
        &self,
        business_id: Uuid,
        owner_id: Uuid,
        currency: &str,
    ) -> Result<Wallet, ServiceError> {
        let currency = validate_currency(currency)?;
        let wallet = Wallet::new(business_id, owner_id, &currency, Utc::now());

        self.store
            .insert_wallet(&wallet)
            .await
            .map_err(record_error)?;

        info!(wallet_id = %wallet.wallet_id, currency = %wallet.currency, "Wallet created");
        Ok(wallet)
    }

    pub async fn get_wallet(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.store
            .find_wallet(wallet_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet {}", wallet_id)))
    }

    pub async fn get_wallet_by_business(&self, business_id: Uuid) -> Result<Wallet, ServiceError> {
        self.store
            .find_wallet_by_business(business_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet for business {}", business_id)))
    }

    /// Record a completed entry and move the balance in one guarded write.
    #[instrument(skip(self, meta), fields(amount = %amount, kind = %kind))]
    pub async fn process_transaction(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        kind: TransactionType,
        meta: TransactionMeta,
    ) -> Result<Transaction, ServiceError> {
        let amount = validate_amount(amount)?;

        let result = self
            .commit_with_retry(wallet_id, |wallet, now| {
                ensure_active(wallet)?;
                let next = apply_completed(wallet, amount, kind, now)?;
                let entry = new_entry(wallet_id, amount, kind, TransactionStatus::Completed, &meta, now);
                Ok((next, entry))
            })
            .await;

        let status = if result.is_ok() { "completed" } else { "rejected" };
        TRANSACTIONS_TOTAL
            .with_label_values(&[kind.as_str(), status])
            .inc();

        let transaction = result.map_err(record_error)?;
        info!(
            transaction_id = %transaction.transaction_id,
            wallet_id = %wallet_id,
            "Transaction processed"
        );
        Ok(transaction)
    }

    /// Record a credit that has not settled yet. It raises `pending_balance`
    /// only; the balance moves on [`complete_pending`](Self::complete_pending).
    #[instrument(skip(self, meta), fields(amount = %amount, kind = %kind))]
    pub async fn record_pending(
        &self,
        wallet_id: Uuid,
        amount: Decimal,
        kind: TransactionType,
        meta: TransactionMeta,
    ) -> Result<Transaction, ServiceError> {
        if kind != TransactionType::Credit {
            return Err(ServiceError::InvalidInput(
                "Only credits can be recorded as pending".to_string(),
            ));
        }
        let amount = validate_amount(amount)?;

        let transaction = self
            .commit_with_retry(wallet_id, |wallet, now| {
                ensure_active(wallet)?;
                let mut next = wallet.next_version(now);
                next.pending_balance += amount;
                let entry = new_entry(wallet_id, amount, kind, TransactionStatus::Pending, &meta, now);
                Ok((next, entry))
            })
            .await
            .map_err(record_error)?;

        TRANSACTIONS_TOTAL
            .with_label_values(&[kind.as_str(), "pending"])
            .inc();
        info!(transaction_id = %transaction.transaction_id, "Pending transaction recorded");
        Ok(transaction)
    }

    pub async fn complete_pending(
        &self,
        transaction_id: Uuid,
        reference_id: Option<String>,
    ) -> Result<Transaction, ServiceError> {
        self.settle(transaction_id, TransactionStatus::Completed, reference_id)
            .await
    }

    pub async fn cancel_pending(&self, transaction_id: Uuid) -> Result<Transaction, ServiceError> {
        self.settle(transaction_id, TransactionStatus::Cancelled, None)
            .await
    }

    pub async fn fail_pending(&self, transaction_id: Uuid) -> Result<Transaction, ServiceError> {
        self.settle(transaction_id, TransactionStatus::Failed, None)
            .await
    }

    #[instrument(skip(self, reference_id), fields(outcome = %outcome))]
    async fn settle(
        &self,
        transaction_id: Uuid,
        outcome: TransactionStatus,
        reference_id: Option<String>,
    ) -> Result<Transaction, ServiceError> {
        for attempt in 0..=self.max_retries {
            let pending = self
                .store
                .find_transaction(transaction_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Transaction {}", transaction_id)))?;

            if !pending.status.can_settle_to(outcome) {
                return Err(record_error(ServiceError::InvalidState(format!(
                    "Transaction {} is {} and cannot become {}",
                    transaction_id, pending.status, outcome
                ))));
            }

            let wallet = self.get_wallet(pending.wallet_id).await?;
            let now = Utc::now();

            let mut next = wallet.next_version(now);
            next.pending_balance -= pending.amount;
            if outcome == TransactionStatus::Completed {
                if wallet.status == WalletStatus::Closed {
                    return Err(record_error(ServiceError::InvalidState(format!(
                        "Wallet {} is closed",
                        wallet.wallet_id
                    ))));
                }
                next.balance += pending.amount;
                next.total_income += pending.amount;
            }

            let settled = Transaction {
                status: outcome,
                reference_id: reference_id.clone().or_else(|| pending.reference_id.clone()),
                updated_utc: now,
                ..pending.clone()
            };

            let write = LedgerWrite {
                wallet: next,
                expected_version: wallet.version,
                entry: LedgerEntryWrite::Settle {
                    transaction: settled.clone(),
                    from: pending.status,
                },
            };

            if self.store.commit_ledger_write(&write).await? {
                TRANSACTIONS_TOTAL
                    .with_label_values(&[settled.transaction_type.as_str(), outcome.as_str()])
                    .inc();
                info!(transaction_id = %transaction_id, "Pending transaction settled");
                return Ok(settled);
            }

            warn!(attempt = attempt, "Wallet changed during settlement, retrying");
        }

        Err(record_error(ServiceError::Conflict(format!(
            "Transaction {} could not be settled after {} attempts",
            transaction_id,
            self.max_retries + 1
        ))))
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, ServiceError> {
        self.store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {}", transaction_id)))
    }

    /// Newest first.
    pub async fn get_transaction_history(
        &self,
        wallet_id: Uuid,
        filter: &TransactionFilter,
    ) -> Result<TransactionPage, ServiceError> {
        self.get_wallet(wallet_id).await?;
        self.store.list_transactions(wallet_id, filter).await
    }

    pub async fn suspend(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.transition(wallet_id, WalletTransition::Suspend).await
    }

    pub async fn reactivate(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.transition(wallet_id, WalletTransition::Reactivate).await
    }

    /// Closed wallets stay on record; they just stop accepting entries.
    pub async fn close(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.transition(wallet_id, WalletTransition::Close).await
    }

    pub async fn verify(&self, wallet_id: Uuid) -> Result<Wallet, ServiceError> {
        self.update_with_retry(wallet_id, |wallet, now| {
            if wallet.status == WalletStatus::Closed {
                return Err(ServiceError::InvalidState(format!(
                    "Wallet {} is closed",
                    wallet.wallet_id
                )));
            }
            let mut next = wallet.next_version(now);
            next.is_verified = true;
            Ok(next)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn transition(
        &self,
        wallet_id: Uuid,
        transition: WalletTransition,
    ) -> Result<Wallet, ServiceError> {
        let wallet = self
            .update_with_retry(wallet_id, |wallet, now| {
                let status = wallet.status.apply(transition).ok_or_else(|| {
                    ServiceError::InvalidState(format!(
                        "Cannot {:?} a {} wallet",
                        transition, wallet.status
                    ))
                })?;
                if transition == WalletTransition::Close && !wallet.pending_balance.is_zero() {
                    return Err(ServiceError::InvalidState(format!(
                        "Wallet {} has {} pending",
                        wallet.wallet_id, wallet.pending_balance
                    )));
                }
                let mut next = wallet.next_version(now);
                next.status = status;
                Ok(next)
            })
            .await?;

        info!(status = %wallet.status, "Wallet status changed");
        Ok(wallet)
    }

    async fn update_with_retry<F>(&self, wallet_id: Uuid, change: F) -> Result<Wallet, ServiceError>
    where
        F: Fn(&Wallet, DateTime<Utc>) -> Result<Wallet, ServiceError>,
    {
        for attempt in 0..=self.max_retries {
            let wallet = self.get_wallet(wallet_id).await?;
            let next = change(&wallet, Utc::now()).map_err(record_error)?;

            if self.store.update_wallet(&next, wallet.version).await? {
                return Ok(next);
            }
            warn!(attempt = attempt, "Wallet version conflict, retrying");
        }

        Err(record_error(ServiceError::Conflict(format!(
            "Wallet {} is under contention",
            wallet_id
        ))))
    }

    async fn commit_with_retry<F>(
        &self,
        wallet_id: Uuid,
        build: F,
    ) -> Result<Transaction, ServiceError>
    where
        F: Fn(&Wallet, DateTime<Utc>) -> Result<(Wallet, Transaction), ServiceError>,
    {
        for attempt in 0..=self.max_retries {
            let wallet = self.get_wallet(wallet_id).await?;
            let (next, entry) = build(&wallet, Utc::now())?;

            let write = LedgerWrite {
                wallet: next,
                expected_version: wallet.version,
                entry: LedgerEntryWrite::Insert(entry.clone()),
            };

            if self.store.commit_ledger_write(&write).await? {
                return Ok(entry);
            }
            warn!(attempt = attempt, "Wallet version conflict, retrying");
        }

        Err(ServiceError::Conflict(format!(
            "Wallet {} is under contention",
            wallet_id
        )))
    }
}

fn new_entry(
    wallet_id: Uuid,
    amount: Decimal,
    kind: TransactionType,
    status: TransactionStatus,
    meta: &TransactionMeta,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        transaction_id: Uuid::new_v4(),
        wallet_id,
        amount,
        transaction_type: kind,
        status,
        reference_id: meta.reference_id.clone(),
        description: meta.description.clone(),
        created_utc: now,
        updated_utc: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_must_be_positive_cents() {
        assert!(validate_amount(Decimal::new(4000, 2)).is_ok());
        assert!(validate_amount(Decimal::new(4050, 3)).is_ok());
        assert!(validate_amount(Decimal::ZERO).is_err());
        assert!(validate_amount(Decimal::new(-100, 2)).is_err());
        assert!(validate_amount(Decimal::new(40005, 3)).is_err());
    }

    #[test]
    fn amounts_fit_the_ledger_columns() {
        assert_eq!(MAX_AMOUNT, Decimal::new(99_999_999_999_999, 2));
        assert!(validate_amount(MAX_AMOUNT).is_ok());
        assert!(matches!(
            validate_amount(Decimal::new(100_000_000_000_000, 2)),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn debit_beyond_balance_is_rejected() {
        let wallet = Wallet::new(Uuid::new_v4(), Uuid::new_v4(), "USD", Utc::now());
        let err = apply_completed(&wallet, Decimal::ONE, TransactionType::Debit, Utc::now())
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientFunds { .. }));
    }

    #[test]
    fn refund_counts_as_expense() {
        let mut wallet = Wallet::new(Uuid::new_v4(), Uuid::new_v4(), "USD", Utc::now());
        wallet.balance = Decimal::new(1000, 2);
        let next =
            apply_completed(&wallet, Decimal::new(250, 2), TransactionType::Refund, Utc::now())
                .unwrap();
        assert_eq!(next.balance, Decimal::new(750, 2));
        assert_eq!(next.total_expenses, Decimal::new(250, 2));
        assert_eq!(next.version, wallet.version + 1);
    }

    #[test]
    fn currency_codes_are_normalized() {
        assert_eq!(validate_currency(" usd ").unwrap(), "USD");
        assert!(validate_currency("US").is_err());
        assert!(validate_currency("U5D").is_err());
    }
}
