//! Single-use, customer-to-customer gift cards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Personal card status.
///
/// `Inactive` is a reserved card whose charge has not (or never) been
/// confirmed. `Used` also covers the legacy "redeemed" spelling and `Active`
/// the legacy "available" spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalGiftCardStatus {
    Active,
    Used,
    Expired,
    Inactive,
}

string_enum!(PersonalGiftCardStatus, "personal gift card status", {
    Active => "active",
    Used => "used",
    Expired => "expired",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonalTransition {
    Activate,
    Use,
    Expire,
}

impl PersonalGiftCardStatus {
    pub fn apply(self, transition: PersonalTransition) -> Option<Self> {
        use PersonalGiftCardStatus::*;
        use PersonalTransition as T;

        match (self, transition) {
            (Inactive, T::Activate) => Some(Active),
            (Active, T::Use) => Some(Used),
            (Active, T::Expire) => Some(Expired),
            (Active | Used | Expired, T::Activate) => None,
            (Used | Expired | Inactive, T::Use) => None,
            (Used | Expired | Inactive, T::Expire) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PersonalGiftCard {
    pub personal_gift_card_id: Uuid,
    pub sender_id: Uuid,
    pub payment_method_id: Uuid,
    pub recipient_name: String,
    pub recipient_email: String,
    pub message: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    #[sqlx(try_from = "String")]
    pub status: PersonalGiftCardStatus,
    pub code: String,
    pub payment_reference: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub redeemed_by: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl PersonalGiftCard {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PurchasePersonalGiftCard {
    pub payment_method_id: Uuid,
    #[validate(length(min = 1, max = 120))]
    pub recipient_name: String,
    #[validate(email)]
    pub recipient_email: String,
    #[validate(length(max = 500))]
    pub message: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidReason {
    Expired,
    Used,
    Inactive,
}

impl InvalidReason {
    pub fn from_status(status: PersonalGiftCardStatus) -> Option<Self> {
        match status {
            PersonalGiftCardStatus::Active => None,
            PersonalGiftCardStatus::Used => Some(Self::Used),
            PersonalGiftCardStatus::Expired => Some(Self::Expired),
            PersonalGiftCardStatus::Inactive => Some(Self::Inactive),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: InvalidReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalRedemptionReceipt {
    pub code: String,
    pub amount: Decimal,
    pub currency: String,
    pub used_at: DateTime<Utc>,
    pub redeemed_by: Uuid,
}
