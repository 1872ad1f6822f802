//! Business-issued gift cards: issue, sell, redeem (partially), expire.
//!
//! Every card write is conditioned on the [`GiftCardGuard`] observed when the
//! change was computed. Redemptions that lose a race re-read the card, so the
//! loser sees the winner's effect (`InvalidState` once the card is used up,
//! `InsufficientFunds` if too little is left) instead of overdrawing it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    BusinessGiftCard, CreateBusinessGiftCard, GiftCardFilter, GiftCardStatus, GiftCardSummary,
    GiftCardTransition, RedemptionReceipt, SaleReceipt, SentStatus, SentTransition,
    Transaction, TransactionMeta, TransactionStatus, TransactionType, Wallet, WalletStatus,
};
use crate::services::codes::{
    generate_business_code, normalize_code, redact, validate_business_code, validate_prefix,
    DEFAULT_BUSINESS_PREFIX,
};
use crate::services::error::ServiceError;
use crate::services::gateway::{charge_until_settled, compensate, ChargeRequest, PaymentGateway};
use crate::services::metrics::{
    record_error, CARDS_EXPIRED_TOTAL, CARDS_ISSUED_TOTAL, REDEMPTIONS_TOTAL,
};
use crate::services::store::Store;
use crate::services::summary::SummaryAggregator;
use crate::services::sweeper::ExpirationSweeper;
use crate::services::wallet::{validate_amount, WalletLedger};
use crate::services::ServicePolicy;

/// Generated codes collide rarely; give up after this many tries.
const CODE_ATTEMPTS: usize = 5;

/// Untouched since issue: never sold and nothing redeemed.
fn is_unsold(card: &BusinessGiftCard) -> bool {
    card.sold_utc.is_none() && card.remaining_amount == card.amount
}

#[derive(Debug, Clone, Copy)]
enum CardChange {
    Status(GiftCardTransition),
    Delivery(SentTransition),
}

pub struct GiftCardCatalog {
    store: Arc<dyn Store>,
    ledger: Arc<WalletLedger>,
    gateway: Arc<dyn PaymentGateway>,
    sweeper: Arc<ExpirationSweeper>,
    summaries: Arc<SummaryAggregator>,
    default_expiry_days: i64,
    max_retries: u32,
    charge_attempts: u32,
    charge_retry_delay: StdDuration,
}

impl GiftCardCatalog {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Arc<WalletLedger>,
        gateway: Arc<dyn PaymentGateway>,
        sweeper: Arc<ExpirationSweeper>,
        summaries: Arc<SummaryAggregator>,
        policy: &ServicePolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            sweeper,
            summaries,
            default_expiry_days: policy.default_expiry_days,
            max_retries: policy.max_retries,
            charge_attempts: policy.charge_attempts,
            charge_retry_delay: policy.charge_retry_delay,
        }
    }

    /// A fresh code in the structured format for `prefix` (default `GC`).
    pub fn generate_code(&self, prefix: Option<&str>) -> Result<String, ServiceError> {
        let prefix = normalize_code(prefix.unwrap_or(DEFAULT_BUSINESS_PREFIX));
        validate_prefix(&prefix)?;
        Ok(generate_business_code(&prefix, Utc::now().year()))
    }

    /// Issue a card for a business owned by `owner_id`.
    #[instrument(skip(self, input), fields(business_id = %input.business_id, amount = %input.amount))]
    pub async fn create(
        &self,
        input: CreateBusinessGiftCard,
        owner_id: Uuid,
    ) -> Result<BusinessGiftCard, ServiceError> {
        input.validate().map_err(|e| record_error(e.into()))?;
        let amount = validate_amount(input.amount).map_err(record_error)?;

        let wallet = self.ledger.get_wallet_by_business(input.business_id).await?;
        if wallet.owner_id != owner_id {
            return Err(record_error(ServiceError::Forbidden(format!(
                "Caller does not own business {}",
                input.business_id
            ))));
        }
        if wallet.status == WalletStatus::Closed {
            return Err(record_error(ServiceError::InvalidState(format!(
                "Business {} has a closed wallet",
                input.business_id
            ))));
        }

        let now = Utc::now();
        let expiry_days = input.expiry_in_days.unwrap_or(self.default_expiry_days);
        let expires_at = now + Duration::days(expiry_days);

        let card = match &input.code {
            Some(code) => {
                let code = normalize_code(code);
                validate_business_code(&code).map_err(record_error)?;
                let card = new_card(&input, code, amount, owner_id, expires_at, now);
                self.store
                    .insert_gift_card(&card)
                    .await
                    .map_err(record_error)?;
                card
            }
            None => {
                self.insert_with_generated_code(&input, amount, owner_id, expires_at, now)
                    .await?
            }
        };

        CARDS_ISSUED_TOTAL.with_label_values(&["business"]).inc();
        info!(
            gift_card_id = %card.gift_card_id,
            code = %redact(&card.code),
            expires_at = %card.expires_at,
            "Gift card created"
        );
        Ok(card)
    }

    async fn insert_with_generated_code(
        &self,
        input: &CreateBusinessGiftCard,
        amount: Decimal,
        owner_id: Uuid,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BusinessGiftCard, ServiceError> {
        for _ in 0..CODE_ATTEMPTS {
            let code = self
                .generate_code(input.code_prefix.as_deref())
                .map_err(record_error)?;
            let card = new_card(input, code, amount, owner_id, expires_at, now);

            match self.store.insert_gift_card(&card).await {
                Ok(()) => return Ok(card),
                Err(ServiceError::Conflict(_)) => {
                    warn!("Generated gift card code collided, regenerating");
                }
                Err(e) => return Err(record_error(e)),
            }
        }

        Err(record_error(ServiceError::Internal(
            "Could not generate a unique gift card code".to_string(),
        )))
    }

    pub async fn get(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.store
            .find_gift_card(gift_card_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Gift card {}", gift_card_id)))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<BusinessGiftCard, ServiceError> {
        self.store
            .find_gift_card_by_code(&normalize_code(code))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Gift card".to_string()))
    }

    pub async fn list_for_business(
        &self,
        business_id: Uuid,
        filter: &GiftCardFilter,
    ) -> Result<Vec<BusinessGiftCard>, ServiceError> {
        self.store.list_gift_cards(business_id, filter).await
    }

    /// Redeem `amount` (default: everything left) from the card.
    ///
    /// A card found past its expiry is moved to `expired` before the call
    /// fails with `Expired`.
    #[instrument(skip(self, code), fields(code = %redact(code)))]
    pub async fn redeem(
        &self,
        code: &str,
        amount: Option<Decimal>,
    ) -> Result<RedemptionReceipt, ServiceError> {
        let result = self.try_redeem(code, amount).await;
        let status = if result.is_ok() { "succeeded" } else { "rejected" };
        REDEMPTIONS_TOTAL
            .with_label_values(&["business", status])
            .inc();
        result.map_err(record_error)
    }

    async fn try_redeem(
        &self,
        code: &str,
        amount: Option<Decimal>,
    ) -> Result<RedemptionReceipt, ServiceError> {
        let requested = amount.map(validate_amount).transpose()?;

        for attempt in 0..=self.max_retries {
            let card = self.get_by_code(code).await?;
            let now = Utc::now();
            self.ensure_not_expired(&card, now).await?;

            match card.status {
                GiftCardStatus::Available => {}
                GiftCardStatus::Redeemed | GiftCardStatus::Cancelled | GiftCardStatus::Expired => {
                    return Err(ServiceError::InvalidState(format!(
                        "Gift card is {}",
                        card.status
                    )));
                }
                GiftCardStatus::Deleted => {
                    return Err(ServiceError::NotFound("Gift card".to_string()));
                }
            }

            let take = requested.unwrap_or(card.remaining_amount);
            if take > card.remaining_amount {
                return Err(ServiceError::InsufficientFunds {
                    requested: take,
                    available: card.remaining_amount,
                });
            }

            let mut next = card.clone();
            next.remaining_amount -= take;
            next.updated_utc = now;
            if next.remaining_amount.is_zero() {
                next.status = card
                    .status
                    .apply(GiftCardTransition::Redeem)
                    .ok_or_else(|| ServiceError::InvalidState("Gift card is not redeemable".into()))?;
                next.redeemed_at = Some(now);
            }

            if self.store.update_gift_card(&next, &card.guard()).await? {
                info!(
                    gift_card_id = %next.gift_card_id,
                    amount = %take,
                    remaining = %next.remaining_amount,
                    "Gift card redeemed"
                );
                return Ok(RedemptionReceipt {
                    gift_card_id: next.gift_card_id,
                    code: next.code,
                    amount_redeemed: take,
                    remaining_amount: next.remaining_amount,
                    status: next.status,
                    redeemed_at: next.redeemed_at,
                });
            }

            warn!(attempt = attempt, "Gift card changed during redemption, retrying");
        }

        Err(ServiceError::Conflict(
            "Gift card is under contention, try again".to_string(),
        ))
    }

    /// Sell an unsold, untouched card to `buyer_id`, crediting the business
    /// wallet with the face value.
    ///
    /// The credit is recorded as pending before the charge and only completed
    /// once the card is marked sold; any failure after a confirmed charge is
    /// refunded. If the gateway's answer stays unknown the credit stays
    /// pending and [`resume_sale`](Self::resume_sale) finishes the sale.
    #[instrument(skip(self, code, payment_method_reference), fields(code = %redact(code)))]
    pub async fn sell(
        &self,
        code: &str,
        buyer_id: Uuid,
        payment_method_reference: &str,
    ) -> Result<SaleReceipt, ServiceError> {
        let card = self.get_by_code(code).await?;
        self.ensure_not_expired(&card, Utc::now())
            .await
            .map_err(record_error)?;

        if card.status != GiftCardStatus::Available {
            return Err(record_error(ServiceError::InvalidState(format!(
                "Gift card is {}",
                card.status
            ))));
        }
        if !is_unsold(&card) {
            return Err(record_error(ServiceError::InvalidState(
                "Gift card has already been sold or used".to_string(),
            )));
        }

        let wallet = self.ledger.get_wallet_by_business(card.business_id).await?;
        let pending = self
            .ledger
            .record_pending(
                wallet.wallet_id,
                card.amount,
                TransactionType::Credit,
                TransactionMeta::new(card.gift_card_id.to_string(), "Gift card sale"),
            )
            .await?;

        self.settle_sale(card, wallet, pending, buyer_id, payment_method_reference)
            .await
    }

    /// Re-drive the charge of a sale whose pending credit was never settled.
    #[instrument(skip(self, payment_method_reference))]
    pub async fn resume_sale(
        &self,
        transaction_id: Uuid,
        buyer_id: Uuid,
        payment_method_reference: &str,
    ) -> Result<SaleReceipt, ServiceError> {
        let pending = self.ledger.get_transaction(transaction_id).await?;
        if pending.status != TransactionStatus::Pending
            || pending.transaction_type != TransactionType::Credit
        {
            return Err(record_error(ServiceError::InvalidState(format!(
                "Transaction {} is {} and cannot be resumed",
                transaction_id, pending.status
            ))));
        }

        let gift_card_id = pending
            .reference_id
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
            .ok_or_else(|| {
                record_error(ServiceError::InvalidState(format!(
                    "Transaction {} is not a gift card sale",
                    transaction_id
                )))
            })?;

        let card = self.get(gift_card_id).await?;
        let wallet = self.ledger.get_wallet(pending.wallet_id).await?;

        self.settle_sale(card, wallet, pending, buyer_id, payment_method_reference)
            .await
    }

    async fn settle_sale(
        &self,
        card: BusinessGiftCard,
        wallet: Wallet,
        pending: Transaction,
        buyer_id: Uuid,
        payment_method_reference: &str,
    ) -> Result<SaleReceipt, ServiceError> {
        let amount = pending.amount;
        let charge = charge_until_settled(
            self.gateway.as_ref(),
            &ChargeRequest {
                payment_method_reference: payment_method_reference.to_string(),
                amount,
                currency: wallet.currency.clone(),
                idempotency_key: pending.transaction_id.to_string(),
                description: Some("Gift card sale".to_string()),
            },
            self.charge_attempts,
            self.charge_retry_delay,
        )
        .await;

        let reference_id = match charge {
            Ok(confirmation) if confirmation.confirmed => confirmation.reference_id.unwrap_or_default(),
            Ok(_) => {
                self.release_quietly(pending.transaction_id).await;
                return Err(record_error(ServiceError::PaymentDeclined(
                    "Charge for gift card sale was declined".to_string(),
                )));
            }
            Err(e) => {
                error!(
                    transaction_id = %pending.transaction_id,
                    "Gift card sale charge unsettled, credit left pending"
                );
                return Err(record_error(e));
            }
        };

        let now = Utc::now();
        let mut sold = card.clone();
        sold.purchaser_id = Some(buyer_id);
        sold.sale_reference = Some(reference_id.clone());
        sold.sold_utc = Some(now);
        sold.updated_utc = now;

        let marked = if card.status == GiftCardStatus::Available
            && is_unsold(&card)
            && !card.is_past_expiry(now)
        {
            self.store.update_gift_card(&sold, &card.guard()).await
        } else {
            Ok(false)
        };
        if !matches!(marked, Ok(true)) {
            let refunded =
                compensate(self.gateway.as_ref(), "business_sale", &reference_id, amount).await;
            self.release_quietly(pending.transaction_id).await;
            refunded?;
            return Err(record_error(match marked {
                Err(e) => e,
                Ok(_) => ServiceError::Conflict("Gift card changed during sale".to_string()),
            }));
        }

        match self
            .ledger
            .complete_pending(pending.transaction_id, Some(reference_id.clone()))
            .await
        {
            Ok(transaction) => {
                info!(
                    gift_card_id = %card.gift_card_id,
                    transaction_id = %transaction.transaction_id,
                    "Gift card sold"
                );
                Ok(SaleReceipt {
                    gift_card_id: card.gift_card_id,
                    code: card.code,
                    amount,
                    currency: wallet.currency,
                    transaction_id: transaction.transaction_id,
                    payment_reference: reference_id,
                })
            }
            Err(e) => {
                let refunded =
                    compensate(self.gateway.as_ref(), "business_sale", &reference_id, amount).await;
                let mut unsold = card.clone();
                unsold.updated_utc = Utc::now();
                if !matches!(self.store.update_gift_card(&unsold, &sold.guard()).await, Ok(true)) {
                    error!(gift_card_id = %card.gift_card_id, "Refunded sale left card marked sold");
                }
                self.release_quietly(pending.transaction_id).await;
                refunded?;
                Err(record_error(e))
            }
        }
    }

    /// Best effort: a pending entry that cannot be released stays pending and
    /// shows up in the wallet's `pending_balance`.
    async fn release_quietly(&self, transaction_id: Uuid) {
        if let Err(e) = self.ledger.cancel_pending(transaction_id).await {
            error!(transaction_id = %transaction_id, error = %e, "Could not release pending credit");
        }
    }

    /// Fail with `Expired` if the card is (or should already be) expired,
    /// persisting the transition in the latter case.
    async fn ensure_not_expired(
        &self,
        card: &BusinessGiftCard,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if card.status == GiftCardStatus::Expired {
            return Err(ServiceError::Expired(format!(
                "Gift card expired at {}",
                card.expires_at
            )));
        }
        if !card.is_past_expiry(now) {
            return Ok(());
        }

        if let Some(status) = card.status.apply(GiftCardTransition::Expire) {
            let expired = BusinessGiftCard {
                status,
                updated_utc: now,
                ..card.clone()
            };
            if self.store.update_gift_card(&expired, &card.guard()).await? {
                CARDS_EXPIRED_TOTAL.with_label_values(&["business"]).inc();
                info!(gift_card_id = %card.gift_card_id, "Gift card expired on access");
            }
        }

        Err(ServiceError::Expired(format!(
            "Gift card expired at {}",
            card.expires_at
        )))
    }

    pub async fn mark_sent(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.change(gift_card_id, CardChange::Delivery(SentTransition::MarkSent))
            .await
    }

    pub async fn mark_delivered(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.change(gift_card_id, CardChange::Delivery(SentTransition::MarkDelivered))
            .await
    }

    pub async fn mark_failed(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.change(gift_card_id, CardChange::Delivery(SentTransition::MarkFailed))
            .await
    }

    /// Fails with `InvalidState` unless the card is still `available`.
    pub async fn cancel(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.change(gift_card_id, CardChange::Status(GiftCardTransition::Cancel))
            .await
    }

    pub async fn mark_as_expired(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.change(gift_card_id, CardChange::Status(GiftCardTransition::Expire))
            .await
    }

    /// Soft delete. The card disappears from every read afterwards.
    pub async fn mark_as_delete(&self, gift_card_id: Uuid) -> Result<BusinessGiftCard, ServiceError> {
        self.change(gift_card_id, CardChange::Status(GiftCardTransition::Delete))
            .await
    }

    #[instrument(skip(self))]
    async fn change(
        &self,
        gift_card_id: Uuid,
        change: CardChange,
    ) -> Result<BusinessGiftCard, ServiceError> {
        for attempt in 0..=self.max_retries {
            let card = self.get(gift_card_id).await?;
            let now = Utc::now();
            let mut next = card.clone();
            next.updated_utc = now;

            match change {
                CardChange::Status(transition) => {
                    next.status = card.status.apply(transition).ok_or_else(|| {
                        record_error(ServiceError::InvalidState(format!(
                            "Cannot {:?} a {} gift card",
                            transition, card.status
                        )))
                    })?;
                }
                CardChange::Delivery(transition) => {
                    if card.status == GiftCardStatus::Cancelled {
                        return Err(record_error(ServiceError::InvalidState(
                            "Gift card is cancelled".to_string(),
                        )));
                    }
                    next.sent_status = card.sent_status.apply(transition).ok_or_else(|| {
                        record_error(ServiceError::InvalidState(format!(
                            "Cannot {:?} a gift card that is {}",
                            transition, card.sent_status
                        )))
                    })?;
                }
            }

            if self.store.update_gift_card(&next, &card.guard()).await? {
                if next.status == GiftCardStatus::Expired && card.status != GiftCardStatus::Expired {
                    CARDS_EXPIRED_TOTAL.with_label_values(&["business"]).inc();
                }
                info!(
                    status = %next.status,
                    sent_status = %next.sent_status,
                    "Gift card updated"
                );
                return Ok(next);
            }

            warn!(attempt = attempt, "Gift card changed concurrently, retrying");
        }

        Err(record_error(ServiceError::Conflict(format!(
            "Gift card {} is under contention",
            gift_card_id
        ))))
    }

    /// Expire every stale `available` card. Safe to repeat.
    pub async fn check_expired_cards(&self) -> Result<u64, ServiceError> {
        self.sweeper.expire_business_cards(Utc::now()).await
    }

    pub async fn get_business_summary(
        &self,
        business_id: Uuid,
    ) -> Result<GiftCardSummary, ServiceError> {
        self.summaries.business_summary(business_id).await
    }
}

fn new_card(
    input: &CreateBusinessGiftCard,
    code: String,
    amount: Decimal,
    owner_id: Uuid,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> BusinessGiftCard {
    BusinessGiftCard {
        gift_card_id: Uuid::new_v4(),
        business_id: input.business_id,
        code,
        amount,
        remaining_amount: amount,
        status: GiftCardStatus::Available,
        sent_status: SentStatus::Pending,
        recipient_name: input.recipient_name.clone(),
        recipient_email: input.recipient_email.clone(),
        message: input.message.clone(),
        created_by: owner_id,
        purchaser_id: None,
        sale_reference: None,
        sold_utc: None,
        expires_at,
        redeemed_at: None,
        created_utc: now,
        updated_utc: now,
    }
}
