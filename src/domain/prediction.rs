use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Period, PropertyType};

/// One backfilled prediction. Append-only: a later session may supersede a
/// record but never deletes or rewrites it, and a record never overwrites a
/// real observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedPriceRecord {
    pub id: Uuid,
    pub location_code: String,
    pub property_type: PropertyType,
    pub year: i32,
    pub month: u32,
    /// TRY per m², clamped to a positive floor by the ensemble.
    pub predicted_price_per_m2: f64,
    /// In [0, 1].
    pub confidence_score: f64,
    /// Provenance, e.g. `trend_seasonality+ensemble_tree` for ensemble output.
    pub model_used: String,
    pub session_id: Uuid,
    /// Always true; lets consumers distinguish fact from inference even when
    /// rows from both collections are mixed into one series.
    pub is_predicted: bool,
    pub created_at: DateTime<Utc>,
}

impl PredictedPriceRecord {
    pub fn period(&self) -> Period {
        Period::new(self.year, self.month)
    }
}
