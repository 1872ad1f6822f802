//! Single-use gift cards bought by one customer for another.
//!
//! Purchase is reserve, charge, activate: the card is stored `inactive`
//! first, so a confirmed charge always has a row to land on, and a failed
//! activation is refunded. A charge whose outcome never comes back leaves the
//! card `inactive` until `resume_purchase` resends it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    InvalidReason, PaymentMethod, PersonalGiftCard, PersonalGiftCardStatus,
    PersonalRedemptionReceipt, PersonalTransition, PurchasePersonalGiftCard, ValidationResult,
    WalletStatus,
};
use crate::services::codes::{generate_personal_code, normalize_code, redact};
use crate::services::error::ServiceError;
use crate::services::gateway::{charge_until_settled, compensate, ChargeRequest, PaymentGateway};
use crate::services::metrics::{
    record_error, CARDS_EXPIRED_TOTAL, CARDS_ISSUED_TOTAL, REDEMPTIONS_TOTAL,
};
use crate::services::store::Store;
use crate::services::sweeper::ExpirationSweeper;
use crate::services::wallet::validate_amount;
use crate::services::ServicePolicy;

const CODE_ATTEMPTS: usize = 5;

pub struct PersonalGiftCardService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    sweeper: Arc<ExpirationSweeper>,
    expiry_days: i64,
    charge_attempts: u32,
    charge_retry_delay: StdDuration,
}

impl PersonalGiftCardService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        sweeper: Arc<ExpirationSweeper>,
        policy: &ServicePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            sweeper,
            expiry_days: policy.personal_expiry_days,
            charge_attempts: policy.charge_attempts,
            charge_retry_delay: policy.charge_retry_delay,
        }
    }

    /// Charge the sender's payment method and issue an active card.
    ///
    /// When the gateway's answer stays unknown the card is left `inactive`
    /// and [`resume_purchase`](Self::resume_purchase) settles it later under
    /// the same idempotency key.
    #[instrument(skip(self, input), fields(amount = %input.amount))]
    pub async fn purchase(
        &self,
        input: PurchasePersonalGiftCard,
        sender_id: Uuid,
    ) -> Result<PersonalGiftCard, ServiceError> {
        input.validate().map_err(|e| record_error(e.into()))?;
        let amount = validate_amount(input.amount).map_err(record_error)?;

        let method = self
            .store
            .find_payment_method(input.payment_method_id)
            .await?
            .filter(|m| m.is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment method {}", input.payment_method_id))
            })?;

        let wallet = self
            .store
            .find_wallet(method.wallet_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Wallet {}", method.wallet_id)))?;

        if wallet.owner_id != sender_id {
            return Err(record_error(ServiceError::Forbidden(
                "Payment method does not belong to the sender".to_string(),
            )));
        }
        if wallet.status == WalletStatus::Closed {
            return Err(record_error(ServiceError::InvalidState(format!(
                "Wallet {} is closed",
                wallet.wallet_id
            ))));
        }

        let reserved = self
            .reserve(&input, amount, &wallet.currency, sender_id)
            .await?;

        self.settle(reserved, &method).await
    }

    /// Re-drive the charge of a purchase whose outcome was never learned.
    ///
    /// Active cards are returned unchanged. The charge is resent under the
    /// card id, so the gateway answers for the original attempt.
    #[instrument(skip(self))]
    pub async fn resume_purchase(
        &self,
        card_id: Uuid,
        sender_id: Uuid,
    ) -> Result<PersonalGiftCard, ServiceError> {
        let card = self
            .store
            .find_personal_card(card_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Personal gift card {}", card_id)))?;

        if card.sender_id != sender_id {
            return Err(record_error(ServiceError::Forbidden(
                "Personal gift card belongs to another sender".to_string(),
            )));
        }
        match card.status {
            PersonalGiftCardStatus::Inactive => {}
            PersonalGiftCardStatus::Active => return Ok(card),
            other => {
                return Err(record_error(ServiceError::InvalidState(format!(
                    "Personal gift card is {}",
                    other
                ))))
            }
        }

        // A method removed since the first attempt still identifies the charge.
        let method = self
            .store
            .find_payment_method(card.payment_method_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment method {}", card.payment_method_id))
            })?;

        self.settle(card, &method).await
    }

    /// Charge for a reserved card and activate it, refunding the charge when
    /// activation loses.
    async fn settle(
        &self,
        reserved: PersonalGiftCard,
        method: &PaymentMethod,
    ) -> Result<PersonalGiftCard, ServiceError> {
        let amount = reserved.amount;
        let charge = charge_until_settled(
            self.gateway.as_ref(),
            &ChargeRequest {
                payment_method_reference: method.gateway_token.clone(),
                amount,
                currency: reserved.currency.clone(),
                idempotency_key: reserved.personal_gift_card_id.to_string(),
                description: Some("Personal gift card".to_string()),
            },
            self.charge_attempts,
            self.charge_retry_delay,
        )
        .await
        .map_err(|e| {
            error!(card_id = %reserved.personal_gift_card_id, "Personal gift card charge unsettled, card left inactive");
            record_error(e)
        })?;

        let reference_id = match charge.reference_id {
            Some(reference_id) if charge.confirmed => reference_id,
            _ => {
                warn!(card_id = %reserved.personal_gift_card_id, "Personal gift card charge declined");
                return Err(record_error(ServiceError::PaymentDeclined(
                    "Charge for personal gift card was declined".to_string(),
                )));
            }
        };

        let now = Utc::now();
        let status = reserved
            .status
            .apply(PersonalTransition::Activate)
            .ok_or_else(|| ServiceError::Internal("Reserved card is not inactive".to_string()))?;
        let active = PersonalGiftCard {
            status,
            payment_reference: Some(reference_id.clone()),
            updated_utc: now,
            ..reserved.clone()
        };

        let activated = self
            .store
            .update_personal_card(&active, PersonalGiftCardStatus::Inactive)
            .await;
        if !matches!(activated, Ok(true)) {
            error!(card_id = %reserved.personal_gift_card_id, "Charged personal gift card could not be activated");
            compensate(self.gateway.as_ref(), "personal_purchase", &reference_id, amount).await?;
            return Err(record_error(match activated {
                Err(e) => e,
                Ok(_) => ServiceError::Conflict("Reserved personal gift card changed".to_string()),
            }));
        }

        CARDS_ISSUED_TOTAL.with_label_values(&["personal"]).inc();
        info!(
            card_id = %active.personal_gift_card_id,
            code = %redact(&active.code),
            expires_at = %active.expires_at,
            "Personal gift card purchased"
        );
        Ok(active)
    }

    async fn reserve(
        &self,
        input: &PurchasePersonalGiftCard,
        amount: Decimal,
        currency: &str,
        sender_id: Uuid,
    ) -> Result<PersonalGiftCard, ServiceError> {
        let now = Utc::now();

        for _ in 0..CODE_ATTEMPTS {
            let card = PersonalGiftCard {
                personal_gift_card_id: Uuid::new_v4(),
                sender_id,
                payment_method_id: input.payment_method_id,
                recipient_name: input.recipient_name.clone(),
                recipient_email: input.recipient_email.clone(),
                message: input.message.clone(),
                amount,
                currency: currency.to_string(),
                status: PersonalGiftCardStatus::Inactive,
                code: generate_personal_code(),
                payment_reference: None,
                expires_at: now + Duration::days(self.expiry_days),
                used_at: None,
                redeemed_by: None,
                created_utc: now,
                updated_utc: now,
            };

            match self.store.insert_personal_card(&card).await {
                Ok(()) => return Ok(card),
                Err(ServiceError::Conflict(_)) => {
                    warn!("Generated personal gift card code collided, regenerating");
                }
                Err(e) => return Err(record_error(e)),
            }
        }

        Err(record_error(ServiceError::Internal(
            "Could not generate a unique personal gift card code".to_string(),
        )))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<PersonalGiftCard, ServiceError> {
        self.store
            .find_personal_card_by_code(&normalize_code(code))
            .await?
            .ok_or_else(|| ServiceError::NotFound("Personal gift card".to_string()))
    }

    /// Cards bought by `sender_id`, newest first.
    pub async fn list_sent(
        &self,
        sender_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PersonalGiftCard>, ServiceError> {
        self.store
            .list_personal_cards_by_sender(sender_id, limit, offset)
            .await
    }

    /// Whether the card can be redeemed right now. An active card found past
    /// its expiry is persisted as `expired` before reporting.
    #[instrument(skip(self, code), fields(code = %redact(code)))]
    pub async fn validate(&self, code: &str) -> Result<ValidationResult, ServiceError> {
        let card = self.get_by_code(code).await?;
        let now = Utc::now();

        if self.expire_if_due(&card, now).await? {
            return Ok(ValidationResult::invalid(InvalidReason::Expired));
        }

        Ok(match InvalidReason::from_status(card.status) {
            None => ValidationResult::valid(),
            Some(reason) => ValidationResult::invalid(reason),
        })
    }

    /// Use the card up. Exactly one of any number of concurrent callers wins.
    #[instrument(skip(self, code), fields(code = %redact(code)))]
    pub async fn redeem(
        &self,
        code: &str,
        redeemer_id: Uuid,
    ) -> Result<PersonalRedemptionReceipt, ServiceError> {
        let result = self.try_redeem(code, redeemer_id).await;
        let status = if result.is_ok() { "succeeded" } else { "rejected" };
        REDEMPTIONS_TOTAL
            .with_label_values(&["personal", status])
            .inc();
        result.map_err(record_error)
    }

    async fn try_redeem(
        &self,
        code: &str,
        redeemer_id: Uuid,
    ) -> Result<PersonalRedemptionReceipt, ServiceError> {
        let card = self.get_by_code(code).await?;
        let now = Utc::now();

        if self.expire_if_due(&card, now).await? {
            return Err(ServiceError::Expired(format!(
                "Personal gift card expired at {}",
                card.expires_at
            )));
        }

        let status = match (card.status, card.status.apply(PersonalTransition::Use)) {
            (_, Some(status)) => status,
            (PersonalGiftCardStatus::Expired, None) => {
                return Err(ServiceError::Expired(format!(
                    "Personal gift card expired at {}",
                    card.expires_at
                )))
            }
            (current, None) => {
                return Err(ServiceError::InvalidState(format!(
                    "Personal gift card is {}",
                    current
                )))
            }
        };

        let used = PersonalGiftCard {
            status,
            used_at: Some(now),
            redeemed_by: Some(redeemer_id),
            updated_utc: now,
            ..card.clone()
        };

        if !self
            .store
            .update_personal_card(&used, PersonalGiftCardStatus::Active)
            .await?
        {
            return Err(ServiceError::InvalidState(
                "Personal gift card is no longer active".to_string(),
            ));
        }

        info!(
            card_id = %used.personal_gift_card_id,
            redeemed_by = %redeemer_id,
            "Personal gift card redeemed"
        );
        Ok(PersonalRedemptionReceipt {
            code: used.code,
            amount: used.amount,
            currency: used.currency,
            used_at: now,
            redeemed_by: redeemer_id,
        })
    }

    /// `true` if the card is active but past its expiry; the `expired`
    /// transition is attempted and a lost race ignored.
    async fn expire_if_due(
        &self,
        card: &PersonalGiftCard,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        if !card.is_past_expiry(now) {
            return Ok(false);
        }
        let Some(status) = card.status.apply(PersonalTransition::Expire) else {
            return Ok(false);
        };

        let expired = PersonalGiftCard {
            status,
            updated_utc: now,
            ..card.clone()
        };
        if self
            .store
            .update_personal_card(&expired, card.status)
            .await?
        {
            CARDS_EXPIRED_TOTAL.with_label_values(&["personal"]).inc();
            info!(card_id = %card.personal_gift_card_id, "Personal gift card expired on access");
        }
        Ok(true)
    }

    /// Expire every stale active card. Safe to repeat.
    pub async fn check_expired_cards(&self) -> Result<u64, ServiceError> {
        self.sweeper.expire_personal_cards(Utc::now()).await
    }
}
