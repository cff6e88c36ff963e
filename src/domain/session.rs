use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::error::BackfillError;
use super::types::{ModelKind, Period, PeriodRange, PropertyType};

fn default_current_data_months() -> u32 {
    12
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_models() -> Vec<ModelKind> {
    vec![
        ModelKind::TrendSeasonality,
        ModelKind::GradientBoosted,
        ModelKind::EnsembleTree,
    ]
}

/// Parameters for one orchestration run. Constructed per request; the
/// effective copy is embedded in the session record for audit.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackfillConfig {
    /// Start of the historical window to scan, e.g. 2016-01-01.
    pub start_date: NaiveDate,
    /// End of the window, inclusive at month granularity.
    pub end_date: NaiveDate,
    /// Minimum months of recent coverage a location needs to be eligible.
    #[serde(default = "default_current_data_months")]
    #[validate(range(min = 1, max = 120))]
    pub current_data_months: u32,
    /// Reporting threshold only; predictions below it are still persisted.
    #[serde(default = "default_confidence_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: f64,
    #[serde(default = "default_models")]
    #[validate(length(min = 1))]
    pub models_to_use: Vec<ModelKind>,
    /// Restrict the run to these segments; all five when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_types: Option<Vec<PropertyType>>,
}

impl BackfillConfig {
    /// Validates the configuration and resolves the month window.
    ///
    /// Field-level problems surface as `Configuration`, a reversed date range
    /// as `InvalidWindow` -- both are structural and fail the run up front.
    pub fn validated_window(&self) -> Result<PeriodRange, BackfillError> {
        Validate::validate(self).map_err(|e| BackfillError::Configuration(e.to_string()))?;
        PeriodRange::new(
            Period::from_date(self.start_date),
            Period::from_date(self.end_date),
        )
    }

    pub fn property_types(&self) -> Vec<PropertyType> {
        self.property_types
            .clone()
            .unwrap_or_else(PropertyType::all)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

/// A non-fatal failure recorded against one location during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationError {
    pub location_code: String,
    pub error: String,
}

/// Holdout fit quality for one model kind, averaged over the locations it was
/// fitted for during the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub model: ModelKind,
    pub locations_fit: u32,
    pub mean_rmse: f64,
    pub mean_mae: f64,
    pub mean_r2: f64,
}

/// One orchestration run's summary and audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSession {
    pub session_id: Uuid,
    pub config: BackfillConfig,
    pub status: SessionStatus,
    pub locations_processed: u32,
    pub locations_skipped: u32,
    pub total_predictions: u32,
    /// May lag `total_predictions` when a persistence write failed.
    pub predictions_persisted: u32,
    /// Predictions whose confidence fell below the configured threshold.
    pub low_confidence_count: u32,
    pub avg_confidence: f64,
    pub models_used: Vec<ModelKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_reports: Vec<ModelReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location_errors: Vec<LocationError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackfillSession {
    /// Opens a fresh session in `Running` state.
    pub fn open(config: BackfillConfig) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            config,
            status: SessionStatus::Running,
            locations_processed: 0,
            locations_skipped: 0,
            total_predictions: 0,
            predictions_persisted: 0,
            low_confidence_count: 0,
            avg_confidence: 0.0,
            models_used: Vec::new(),
            model_reports: Vec::new(),
            location_errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}
