//! Read-side merge of observed and predicted series.
//!
//! Predictions never replace observations: when both exist for a month the
//! observed value wins and the predicted row stays in the store untouched.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    BackfillError, BackfillSession, Period, PredictedPriceRecord, PropertyType,
};
use crate::store::Stores;

/// One month of the merged series.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPoint {
    pub year: i32,
    pub month: u32,
    pub price_per_m2: f64,
    pub is_predicted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SeriesStatistics {
    pub historical_count: usize,
    pub predicted_count: usize,
    /// Mean confidence over the predicted points of the merged series; zero
    /// when none survived the merge.
    pub avg_confidence: f64,
}

pub struct ResultsReader {
    stores: Stores,
}

impl ResultsReader {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Observed series merged with one session's predictions, chronological.
    ///
    /// `session_id = None` falls back to the latest session that wrote
    /// predictions for this location/segment. Returns `Ok(None)` when the
    /// location/segment has neither observations nor predictions.
    pub async fn combined_series(
        &self,
        location: &str,
        property_type: PropertyType,
        session_id: Option<Uuid>,
    ) -> Result<Option<(Vec<SeriesPoint>, SeriesStatistics)>, BackfillError> {
        let observations = self
            .stores
            .observations
            .find_series(location, property_type)
            .await
            .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?;

        let session_id = match session_id {
            Some(id) => Some(id),
            None => self
                .stores
                .predictions
                .latest_session_for(location, property_type)
                .await
                .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?,
        };
        let predictions = match session_id {
            Some(id) => self
                .stores
                .predictions
                .find_series(location, property_type, id)
                .await
                .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?,
            None => Vec::new(),
        };

        if observations.is_empty() && predictions.is_empty() {
            return Ok(None);
        }

        let mut merged: BTreeMap<Period, SeriesPoint> = BTreeMap::new();
        for p in &predictions {
            merged.insert(
                p.period(),
                SeriesPoint {
                    year: p.year,
                    month: p.month,
                    price_per_m2: p.predicted_price_per_m2,
                    is_predicted: true,
                    confidence_score: Some(p.confidence_score),
                    model_used: Some(p.model_used.clone()),
                },
            );
        }
        // Observed months overwrite predicted ones.
        for o in &observations {
            merged.insert(
                o.period(),
                SeriesPoint {
                    year: o.year,
                    month: o.month,
                    price_per_m2: o.avg_price_per_m2,
                    is_predicted: false,
                    confidence_score: None,
                    model_used: None,
                },
            );
        }

        let points: Vec<SeriesPoint> = merged.into_values().collect();
        let stats = series_statistics(&points);
        Ok(Some((points, stats)))
    }

    /// Session record plus every prediction it wrote. `session_id = None`
    /// resolves to the most recently started session.
    pub async fn session_results(
        &self,
        session_id: Option<Uuid>,
    ) -> Result<Option<(BackfillSession, Vec<PredictedPriceRecord>)>, BackfillError> {
        let session = match session_id {
            Some(id) => self
                .stores
                .sessions
                .get(id)
                .await
                .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?,
            None => self
                .stores
                .sessions
                .latest()
                .await
                .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?,
        };
        let Some(session) = session else {
            return Ok(None);
        };
        let predictions = self
            .stores
            .predictions
            .find_by_session(session.session_id)
            .await
            .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?;
        Ok(Some((session, predictions)))
    }
}

pub fn series_statistics(points: &[SeriesPoint]) -> SeriesStatistics {
    let predicted: Vec<&SeriesPoint> = points.iter().filter(|p| p.is_predicted).collect();
    let avg_confidence = if predicted.is_empty() {
        0.0
    } else {
        predicted
            .iter()
            .filter_map(|p| p.confidence_score)
            .sum::<f64>()
            / predicted.len() as f64
    };
    SeriesStatistics {
        historical_count: points.len() - predicted.len(),
        predicted_count: predicted.len(),
        avg_confidence,
    }
}
