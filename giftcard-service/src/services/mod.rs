//! Services module for giftcard-service.

pub mod catalog;
pub mod codes;
pub mod database;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod metrics;
pub mod payment_methods;
pub mod personal;
pub mod store;
pub mod summary;
pub mod sweeper;
pub mod wallet;

use std::sync::Arc;
use std::time::Duration;

pub use catalog::GiftCardCatalog;
pub use database::Database;
pub use error::ServiceError;
pub use gateway::{ChargeConfirmation, ChargeRequest, HttpPaymentGateway, PaymentGateway, RefundRequest};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics, record_error};
pub use payment_methods::PaymentMethodRegistry;
pub use personal::PersonalGiftCardService;
pub use store::Store;
pub use summary::SummaryAggregator;
pub use sweeper::ExpirationSweeper;
pub use wallet::WalletLedger;

/// Tunables shared by the components.
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    /// Catalog card lifetime when the issuer gives none.
    pub default_expiry_days: i64,
    pub personal_expiry_days: i64,
    /// Re-reads after a lost optimistic write before giving up with `Conflict`.
    pub max_retries: u32,
    /// Charge sends per purchase while the gateway's answer is unknown.
    pub charge_attempts: u32,
    pub charge_retry_delay: Duration,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            default_expiry_days: 365,
            personal_expiry_days: 7,
            max_retries: 5,
            charge_attempts: 3,
            charge_retry_delay: Duration::from_millis(250),
        }
    }
}

/// Every component, wired over one store and one gateway.
#[derive(Clone)]
pub struct GiftCardServices {
    pub wallets: Arc<WalletLedger>,
    pub payment_methods: Arc<PaymentMethodRegistry>,
    pub catalog: Arc<GiftCardCatalog>,
    pub personal: Arc<PersonalGiftCardService>,
    pub sweeper: Arc<ExpirationSweeper>,
    pub summaries: Arc<SummaryAggregator>,
    store: Arc<dyn Store>,
}

impl GiftCardServices {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        policy: &ServicePolicy,
    ) -> Self {
        let wallets = Arc::new(WalletLedger::new(store.clone(), policy.max_retries));
        let sweeper = Arc::new(ExpirationSweeper::new(store.clone()));
        let summaries = Arc::new(SummaryAggregator::new(store.clone()));

        let catalog = Arc::new(GiftCardCatalog::new(
            store.clone(),
            wallets.clone(),
            gateway.clone(),
            sweeper.clone(),
            summaries.clone(),
            policy,
        ));
        let personal = Arc::new(PersonalGiftCardService::new(
            store.clone(),
            gateway,
            sweeper.clone(),
            policy,
        ));

        Self {
            wallets,
            payment_methods: Arc::new(PaymentMethodRegistry::new(store.clone())),
            catalog,
            personal,
            sweeper,
            summaries,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }
}
