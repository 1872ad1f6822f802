//! Read-side aggregates.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GiftCardStatus, SentStatus};

/// One `GROUP BY status, sent_status` row over live cards.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryBucket {
    pub status: GiftCardStatus,
    pub sent_status: SentStatus,
    pub card_count: i64,
    pub face_value: Decimal,
    pub remaining_value: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftCardSummary {
    pub business_id: Uuid,
    pub total_cards: i64,
    pub available: i64,
    pub redeemed: i64,
    pub expired: i64,
    pub cancelled: i64,
    pub sent_pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub delivery_failed: i64,
    pub total_face_value: Decimal,
    pub total_remaining_value: Decimal,
    pub redeemed_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub business_cards_expired: u64,
    pub personal_cards_expired: u64,
    pub swept_at: DateTime<Utc>,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.business_cards_expired + self.personal_cards_expired
    }
}
