use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Short label for the errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::InsufficientFunds { .. } => "insufficient_funds",
            ServiceError::Expired(_) => "expired",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Validation(_) | ServiceError::InvalidInput(_) => "validation",
            ServiceError::PaymentDeclined(_) => "payment_declined",
            ServiceError::Gateway(_) => "gateway",
            ServiceError::Database(_) => "db_error",
            ServiceError::Internal(_) => "internal",
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Unique violations are conflicts; everything else is a storage failure.
impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            ServiceError::Conflict(err.to_string())
        } else {
            ServiceError::Database(err.to_string())
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::InvalidState(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            e @ ServiceError::InsufficientFunds { .. } => {
                AppError::PaymentRequired(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::Expired(msg) => AppError::Gone(anyhow::anyhow!(msg)),
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::Validation(errors) => AppError::ValidationError(errors),
            ServiceError::InvalidInput(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::PaymentDeclined(msg) => AppError::PaymentRequired(anyhow::anyhow!(msg)),
            ServiceError::Gateway(msg) => AppError::BadGateway(msg),
            ServiceError::Database(msg) => AppError::DatabaseError(anyhow::anyhow!(msg)),
            ServiceError::Internal(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}
