//! Operational HTTP surface: probes, metrics and internal maintenance routes.

pub mod health;
pub mod internal;

pub use health::{health_check, metrics_handler, readiness_check};
pub use internal::{business_summary, run_sweep};
