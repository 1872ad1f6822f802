//! Prometheus metrics for giftcard-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};

/// Ledger entries by type and outcome.
pub static TRANSACTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "giftcard_transactions_total",
        "Total number of wallet ledger entries processed",
        &["type", "status"]
    )
    .expect("Failed to register transactions_total")
});

/// Redemption attempts by card kind and outcome.
pub static REDEMPTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "giftcard_redemptions_total",
        "Total number of gift card redemption attempts",
        &["kind", "status"]  // kind: business, personal
    )
    .expect("Failed to register redemptions_total")
});

pub static CARDS_ISSUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "giftcard_cards_issued_total",
        "Total number of gift cards issued",
        &["kind"]
    )
    .expect("Failed to register cards_issued_total")
});

pub static CARDS_EXPIRED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "giftcard_cards_expired_total",
        "Total number of gift cards transitioned to expired",
        &["kind"]
    )
    .expect("Failed to register cards_expired_total")
});

/// Refunds issued to undo a charge whose follow-up write failed.
pub static COMPENSATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "giftcard_compensations_total",
        "Total number of compensating refunds by flow and outcome",
        &["flow", "status"]
    )
    .expect("Failed to register compensations_total")
});

pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "giftcard_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "giftcard_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TRANSACTIONS_TOTAL);
    Lazy::force(&REDEMPTIONS_TOTAL);
    Lazy::force(&CARDS_ISSUED_TOTAL);
    Lazy::force(&CARDS_EXPIRED_TOTAL);
    Lazy::force(&COMPENSATIONS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Count a failed operation by error kind and hand the error back.
pub fn record_error(err: crate::services::ServiceError) -> crate::services::ServiceError {
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
    err
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
