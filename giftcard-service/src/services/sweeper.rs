//! Expiration sweep over both gift-card tables.
//!
//! Each table is one bulk conditional update keyed on the current status, so
//! a sweep can overlap another sweep or a redemption without either losing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

use crate::models::SweepReport;
use crate::services::error::ServiceError;
use crate::services::metrics::{record_error, CARDS_EXPIRED_TOTAL};
use crate::services::store::Store;

pub struct ExpirationSweeper {
    store: Arc<dyn Store>,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn expire_business_cards(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let expired = self
            .store
            .expire_gift_cards(now)
            .await
            .map_err(record_error)?;

        CARDS_EXPIRED_TOTAL
            .with_label_values(&["business"])
            .inc_by(expired as f64);
        Ok(expired)
    }

    #[instrument(skip(self))]
    pub async fn expire_personal_cards(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let expired = self
            .store
            .expire_personal_cards(now)
            .await
            .map_err(record_error)?;

        CARDS_EXPIRED_TOTAL
            .with_label_values(&["personal"])
            .inc_by(expired as f64);
        Ok(expired)
    }

    /// Expire stale records in both tables.
    pub async fn sweep(&self) -> Result<SweepReport, ServiceError> {
        let now = Utc::now();
        let report = SweepReport {
            business_cards_expired: self.expire_business_cards(now).await?,
            personal_cards_expired: self.expire_personal_cards(now).await?,
            swept_at: now,
        };

        if report.total() > 0 {
            info!(
                business = report.business_cards_expired,
                personal = report.personal_cards_expired,
                "Expired gift cards swept"
            );
        } else {
            debug!("Sweep found nothing to expire");
        }
        Ok(report)
    }

    /// Run [`sweep`](Self::sweep) every `period`. Failures are logged and the
    /// next tick tries again.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        info!(interval_secs = period.as_secs(), "Starting expiration sweeper");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    error!(error = %e, "Expiration sweep failed");
                }
            }
        })
    }
}
