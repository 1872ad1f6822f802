//! Business-issued, partially redeemable gift cards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Card lifecycle status.
///
/// `Available` also covers the legacy "active" spelling and `Redeemed` the
/// legacy "used" spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GiftCardStatus {
    Available,
    Redeemed,
    Expired,
    Cancelled,
    Deleted,
}

string_enum!(GiftCardStatus, "gift card status", {
    Available => "available",
    Redeemed => "redeemed",
    Expired => "expired",
    Cancelled => "cancelled",
    Deleted => "deleted",
});

/// Status-changing operations on a card.
///
/// Partial redemption is not a transition: the card stays `Available` until
/// its remaining amount reaches zero, at which point `Redeem` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftCardTransition {
    Redeem,
    Cancel,
    Expire,
    Delete,
}

impl GiftCardStatus {
    /// Transition table. Every (status, transition) pair is listed so a new
    /// status or transition fails to compile until it is classified.
    pub fn apply(self, transition: GiftCardTransition) -> Option<Self> {
        use GiftCardStatus::*;
        use GiftCardTransition as T;

        match (self, transition) {
            (Available, T::Redeem) => Some(Redeemed),
            (Available, T::Cancel) => Some(Cancelled),
            (Available, T::Expire) => Some(Expired),
            (Available | Redeemed | Expired | Cancelled, T::Delete) => Some(Deleted),
            (Redeemed | Expired | Cancelled | Deleted, T::Redeem) => None,
            (Redeemed | Expired | Cancelled | Deleted, T::Cancel) => None,
            (Redeemed | Expired | Cancelled | Deleted, T::Expire) => None,
            (Deleted, T::Delete) => None,
        }
    }
}

/// Delivery status of the card to its recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

string_enum!(SentStatus, "sent status", {
    Pending => "pending",
    Sent => "sent",
    Delivered => "delivered",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentTransition {
    MarkSent,
    MarkDelivered,
    MarkFailed,
}

impl SentStatus {
    pub fn apply(self, transition: SentTransition) -> Option<Self> {
        use SentStatus::*;
        use SentTransition as T;

        match (self, transition) {
            (Pending | Failed, T::MarkSent) => Some(Sent),
            (Sent, T::MarkDelivered) => Some(Delivered),
            (Pending | Sent, T::MarkFailed) => Some(Failed),
            (Sent | Delivered, T::MarkSent) => None,
            (Pending | Delivered | Failed, T::MarkDelivered) => None,
            (Delivered | Failed, T::MarkFailed) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BusinessGiftCard {
    pub gift_card_id: Uuid,
    pub business_id: Uuid,
    pub code: String,
    /// Face value.
    pub amount: Decimal,
    pub remaining_amount: Decimal,
    #[sqlx(try_from = "String")]
    pub status: GiftCardStatus,
    #[sqlx(try_from = "String")]
    pub sent_status: SentStatus,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub message: Option<String>,
    pub created_by: Uuid,
    pub purchaser_id: Option<Uuid>,
    pub sale_reference: Option<String>,
    pub sold_utc: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// The observed state a conditional card write is guarded on.
#[derive(Debug, Clone, PartialEq)]
pub struct GiftCardGuard {
    pub status: GiftCardStatus,
    pub sent_status: SentStatus,
    pub remaining_amount: Decimal,
    pub sold_utc: Option<DateTime<Utc>>,
}

impl BusinessGiftCard {
    pub fn guard(&self) -> GiftCardGuard {
        GiftCardGuard {
            status: self.status,
            sent_status: self.sent_status,
            remaining_amount: self.remaining_amount,
            sold_utc: self.sold_utc,
        }
    }

    pub fn matches(&self, guard: &GiftCardGuard) -> bool {
        self.status == guard.status
            && self.sent_status == guard.sent_status
            && self.remaining_amount == guard.remaining_amount
            && self.sold_utc == guard.sold_utc
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn redeemed_value(&self) -> Decimal {
        self.amount - self.remaining_amount
    }
}

/// Input for issuing a card. A missing `code` is generated from `code_prefix`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBusinessGiftCard {
    pub business_id: Uuid,
    #[validate(length(min = 12, max = 48))]
    pub code: Option<String>,
    #[validate(length(min = 2, max = 10))]
    pub code_prefix: Option<String>,
    pub amount: Decimal,
    #[validate(range(min = 1, max = 3650))]
    pub expiry_in_days: Option<i64>,
    #[validate(length(min = 1, max = 120))]
    pub recipient_name: Option<String>,
    #[validate(email)]
    pub recipient_email: Option<String>,
    #[validate(length(max = 500))]
    pub message: Option<String>,
}

impl CreateBusinessGiftCard {
    pub fn new(business_id: Uuid, amount: Decimal) -> Self {
        Self {
            business_id,
            code: None,
            code_prefix: None,
            amount,
            expiry_in_days: None,
            recipient_name: None,
            recipient_email: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GiftCardFilter {
    pub status: Option<GiftCardStatus>,
    pub sent_status: Option<SentStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for GiftCardFilter {
    fn default() -> Self {
        Self {
            status: None,
            sent_status: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl GiftCardFilter {
    pub fn page_size(&self) -> i64 {
        self.limit.clamp(1, 100)
    }

    pub fn matches(&self, card: &BusinessGiftCard) -> bool {
        self.status.map_or(true, |s| s == card.status)
            && self.sent_status.map_or(true, |s| s == card.sent_status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionReceipt {
    pub gift_card_id: Uuid,
    pub code: String,
    pub amount_redeemed: Decimal,
    pub remaining_amount: Decimal,
    pub status: GiftCardStatus,
    pub redeemed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleReceipt {
    pub gift_card_id: Uuid,
    pub code: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_id: Uuid,
    pub payment_reference: String,
}
