//! Read-side statistics over a business's live gift cards.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use crate::models::{GiftCardStatus, GiftCardSummary, SentStatus, SummaryBucket};
use crate::services::error::ServiceError;
use crate::services::store::Store;

pub struct SummaryAggregator {
    store: Arc<dyn Store>,
}

impl SummaryAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn business_summary(&self, business_id: Uuid) -> Result<GiftCardSummary, ServiceError> {
        let buckets = self.store.gift_card_summary(business_id).await?;
        Ok(fold_buckets(business_id, &buckets))
    }
}

/// Collapse `(status, sent_status)` buckets into one summary.
pub fn fold_buckets(business_id: Uuid, buckets: &[SummaryBucket]) -> GiftCardSummary {
    let mut summary = GiftCardSummary {
        business_id,
        ..Default::default()
    };

    for bucket in buckets {
        // Deleted cards never reach a summary.
        let status_count = match bucket.status {
            GiftCardStatus::Available => &mut summary.available,
            GiftCardStatus::Redeemed => &mut summary.redeemed,
            GiftCardStatus::Expired => &mut summary.expired,
            GiftCardStatus::Cancelled => &mut summary.cancelled,
            GiftCardStatus::Deleted => continue,
        };
        *status_count += bucket.card_count;

        let sent_count = match bucket.sent_status {
            SentStatus::Pending => &mut summary.sent_pending,
            SentStatus::Sent => &mut summary.sent,
            SentStatus::Delivered => &mut summary.delivered,
            SentStatus::Failed => &mut summary.delivery_failed,
        };
        *sent_count += bucket.card_count;

        summary.total_cards += bucket.card_count;
        summary.total_face_value += bucket.face_value;
        summary.total_remaining_value += bucket.remaining_value;
    }

    summary.redeemed_value = summary.total_face_value - summary.total_remaining_value;
    if summary.redeemed_value < Decimal::ZERO {
        summary.redeemed_value = Decimal::ZERO;
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(
        status: GiftCardStatus,
        sent_status: SentStatus,
        count: i64,
        face: i64,
        remaining: i64,
    ) -> SummaryBucket {
        SummaryBucket {
            status,
            sent_status,
            card_count: count,
            face_value: Decimal::new(face, 0),
            remaining_value: Decimal::new(remaining, 0),
        }
    }

    #[test]
    fn folds_counts_and_values() {
        let id = Uuid::new_v4();
        let summary = fold_buckets(
            id,
            &[
                bucket(GiftCardStatus::Available, SentStatus::Pending, 2, 200, 160),
                bucket(GiftCardStatus::Available, SentStatus::Sent, 1, 50, 50),
                bucket(GiftCardStatus::Redeemed, SentStatus::Delivered, 1, 100, 0),
            ],
        );

        assert_eq!(summary.business_id, id);
        assert_eq!(summary.total_cards, 4);
        assert_eq!(summary.available, 3);
        assert_eq!(summary.redeemed, 1);
        assert_eq!(summary.sent_pending, 2);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.total_face_value, Decimal::new(350, 0));
        assert_eq!(summary.total_remaining_value, Decimal::new(210, 0));
        assert_eq!(summary.redeemed_value, Decimal::new(140, 0));
    }

    #[test]
    fn deleted_buckets_are_ignored() {
        let summary = fold_buckets(
            Uuid::new_v4(),
            &[bucket(GiftCardStatus::Deleted, SentStatus::Sent, 3, 300, 300)],
        );
        assert_eq!(summary.total_cards, 0);
        assert_eq!(summary.total_face_value, Decimal::ZERO);
    }
}
