//! Backfill endpoints: gap scan, run trigger, merged series and session
//! audit listing.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{error::ApiError, AppState};
use crate::backfill::gaps::MissingPeriod;
use crate::backfill::results::{SeriesPoint, SeriesStatistics};
use crate::domain::{
    BackfillConfig, BackfillSession, ModelKind, PredictedPriceRecord, PropertyType, SessionStatus,
};

#[derive(Debug, Serialize)]
pub struct DetectMissingResponse {
    pub missing_periods: BTreeMap<String, Vec<MissingPeriod>>,
    pub statistics: DetectStatistics,
}

#[derive(Debug, Serialize)]
pub struct DetectStatistics {
    pub locations_with_missing_data: usize,
    pub total_missing_periods: usize,
    pub date_range: DateRange,
}

#[derive(Debug, Serialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// POST /api/backfill/detect-missing - Scan for gaps without side effects
pub async fn detect_missing(
    State(state): State<AppState>,
    Json(config): Json<BackfillConfig>,
) -> Result<Json<DetectMissingResponse>, ApiError> {
    let window = config.validated_window()?;
    let missing = state.orchestrator.detect(&config).await?;

    let statistics = DetectStatistics {
        locations_with_missing_data: missing.len(),
        total_missing_periods: missing.values().map(Vec::len).sum(),
        date_range: DateRange {
            start: window.start.to_string(),
            end: window.end.to_string(),
        },
    };
    Ok(Json(DetectMissingResponse {
        missing_periods: missing,
        statistics,
    }))
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub success: bool,
    pub session_id: Uuid,
    pub backfilled_locations: u32,
    pub skipped_locations: u32,
    pub total_predictions: u32,
    pub predictions_persisted: u32,
    pub low_confidence_count: u32,
    pub avg_confidence: f64,
    pub models_used: Vec<ModelKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&BackfillSession> for RunResponse {
    fn from(session: &BackfillSession) -> Self {
        Self {
            success: session.status == SessionStatus::Completed,
            session_id: session.session_id,
            backfilled_locations: session.locations_processed,
            skipped_locations: session.locations_skipped,
            total_predictions: session.total_predictions,
            predictions_persisted: session.predictions_persisted,
            low_confidence_count: session.low_confidence_count,
            avg_confidence: session.avg_confidence,
            models_used: session.models_used.clone(),
            error: session.error.clone(),
        }
    }
}

/// POST /api/backfill/run - Execute a full backfill run
///
/// Per-location failures are reported inside the session, not as an HTTP
/// error; only structural problems (bad window, unreachable store) fail the
/// request itself.
pub async fn run_backfill(
    State(state): State<AppState>,
    Json(config): Json<BackfillConfig>,
) -> Result<Json<RunResponse>, ApiError> {
    let session = state.orchestrator.run(config).await?;
    Ok(Json(RunResponse::from(&session)))
}

#[derive(Debug, Deserialize)]
pub struct VisualizationQuery {
    pub location_code: String,
    #[serde(default = "default_property_type")]
    pub property_type: PropertyType,
    pub session_id: Option<Uuid>,
}

fn default_property_type() -> PropertyType {
    PropertyType::ResidentialSale
}

#[derive(Debug, Serialize)]
pub struct VisualizationResponse {
    pub location_code: String,
    pub property_type: PropertyType,
    pub series: Vec<SeriesPoint>,
    pub statistics: SeriesStatistics,
}

/// GET /api/backfill/visualization - Observed and predicted series, merged
pub async fn visualization(
    State(state): State<AppState>,
    Query(query): Query<VisualizationQuery>,
) -> Result<Json<VisualizationResponse>, ApiError> {
    let merged = state
        .results
        .combined_series(&query.location_code, query.property_type, query.session_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "no data for location {} ({})",
                query.location_code, query.property_type
            ))
        })?;

    let (series, statistics) = merged;
    Ok(Json(VisualizationResponse {
        location_code: query.location_code,
        property_type: query.property_type,
        series,
        statistics,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub session: BackfillSession,
    pub predictions: Vec<PredictedPriceRecord>,
}

/// GET /api/backfill/results - Session summary plus its raw predictions
pub async fn results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let (session, predictions) = state
        .results
        .session_results(query.session_id)
        .await?
        .ok_or_else(|| match query.session_id {
            Some(id) => ApiError::NotFound(format!("no session {id}")),
            None => ApiError::NotFound("no backfill session has run yet".to_string()),
        })?;
    Ok(Json(ResultsResponse {
        session,
        predictions,
    }))
}
