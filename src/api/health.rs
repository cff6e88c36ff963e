use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::{error::ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub observations: usize,
    pub macro_points: usize,
    pub predictions: usize,
}

/// GET /api/health - Liveness with store counts
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        observations: state.stores.observations.count().await?,
        macro_points: state.stores.macros.count().await?,
        predictions: state.stores.predictions.count().await?,
    }))
}
