use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{GiftCardSummary, SweepReport};
use crate::startup::AppState;

/// Run the expiration sweep now instead of waiting for the timer.
pub async fn run_sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let report = state.services.sweeper.sweep().await?;
    Ok(Json(report))
}

pub async fn business_summary(
    State(state): State<AppState>,
    Path(business_id): Path<Uuid>,
) -> Result<Json<GiftCardSummary>, AppError> {
    let summary = state
        .services
        .catalog
        .get_business_summary(business_id)
        .await?;
    Ok(Json(summary))
}
