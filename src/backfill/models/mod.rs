//! Forecasting models behind the ensemble.
//!
//! Each [`ModelKind`] maps to one [`PriceModel`] through a fixed registry;
//! adding a strategy means a new module plus one arm in [`construct`].

pub mod boosted;
pub mod forest;
pub mod trend;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::domain::{BackfillError, ModelKind, Period, PropertyType};

/// One location/segment series prepared for fitting: observed points in
/// chronological order, with the dense feature row for each point.
#[derive(Debug, Clone)]
pub struct TrainingSeries {
    pub location_code: String,
    pub property_type: PropertyType,
    pub points: Vec<(Period, f64)>,
    pub features: Vec<Vec<f64>>,
}

impl TrainingSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.points.iter().map(|&(_, y)| y).collect()
    }

    /// Chronological head/tail split for holdout evaluation. The tail is the
    /// last 20%, at least one point when the series has more than one.
    pub fn split_holdout(&self) -> (TrainingSeries, TrainingSeries) {
        let holdout = ((self.len() as f64 * 0.2).round() as usize)
            .clamp(usize::from(self.len() > 1), self.len().saturating_sub(1));
        let split = self.len() - holdout;
        let head = TrainingSeries {
            location_code: self.location_code.clone(),
            property_type: self.property_type,
            points: self.points[..split].to_vec(),
            features: self.features[..split].to_vec(),
        };
        let tail = TrainingSeries {
            location_code: self.location_code.clone(),
            property_type: self.property_type,
            points: self.points[split..].to_vec(),
            features: self.features[split..].to_vec(),
        };
        (head, tail)
    }
}

/// Holdout fit quality for one fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl ValidationMetrics {
    pub fn compute(predictions: &[f64], targets: &[f64]) -> Result<Self, BackfillError> {
        if predictions.len() != targets.len() || predictions.is_empty() {
            return Err(BackfillError::ModelFitFailed(format!(
                "metric input mismatch: {} predictions, {} targets",
                predictions.len(),
                targets.len()
            )));
        }

        let n = predictions.len() as f64;
        let mae = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).abs())
            .sum::<f64>()
            / n;
        let mse = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / n;

        let target_mean = targets.iter().sum::<f64>() / n;
        let ss_tot: f64 = targets.iter().map(|t| (t - target_mean).powi(2)).sum();
        let ss_res: f64 = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| (t - p).powi(2))
            .sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        Ok(Self {
            rmse: mse.sqrt(),
            mae,
            r2,
        })
    }
}

/// A fitted model, ready to score missing months.
pub trait Forecast: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn metrics(&self) -> ValidationMetrics;

    /// Point estimate for one target month. `features` is the dense row for
    /// that month; calendar-only models ignore it.
    fn predict(&self, target: Period, features: &[f64]) -> Result<f64, BackfillError>;
}

/// A forecasting strategy. Stateless; fitting returns a separate [`Forecast`].
pub trait PriceModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Observed months the strategy needs before fitting is attempted.
    fn min_history(&self) -> usize;

    fn fit(&self, series: &TrainingSeries) -> Result<Box<dyn Forecast>, BackfillError>;
}

fn construct(kind: ModelKind) -> Box<dyn PriceModel> {
    match kind {
        ModelKind::TrendSeasonality => Box::new(trend::TrendSeasonalityModel::default()),
        ModelKind::GradientBoosted => Box::new(boosted::GradientBoostedModel::default()),
        ModelKind::EnsembleTree => Box::new(forest::EnsembleTreeModel::default()),
    }
}

static REGISTRY: Lazy<HashMap<ModelKind, Box<dyn PriceModel>>> =
    Lazy::new(|| ModelKind::iter().map(|kind| (kind, construct(kind))).collect());

/// Lookup by kind. Total: the registry is seeded from every enum variant.
pub fn model_for(kind: ModelKind) -> &'static dyn PriceModel {
    REGISTRY
        .get(&kind)
        .map(Box::as_ref)
        .expect("registry seeded from ModelKind::iter")
}

/// Fits on the chronological head, evaluates on the tail, then refits on the
/// full series so the returned forecast has seen every observation.
pub fn fit_with_holdout(
    model: &dyn PriceModel,
    series: &TrainingSeries,
) -> Result<Box<dyn Forecast>, BackfillError> {
    let (head, tail) = series.split_holdout();
    let metrics = if head.len() >= model.min_history() && !tail.is_empty() {
        let fitted = model.fit(&head)?;
        let predictions: Vec<f64> = tail
            .points
            .iter()
            .zip(&tail.features)
            .map(|(&(period, _), row)| fitted.predict(period, row))
            .collect::<Result<_, _>>()?;
        Some(ValidationMetrics::compute(&predictions, &tail.targets())?)
    } else {
        None
    };

    let mut fitted = model.fit(series)?;
    if let Some(metrics) = metrics {
        fitted = with_metrics(fitted, metrics);
    }
    Ok(fitted)
}

struct MetricsOverride {
    inner: Box<dyn Forecast>,
    metrics: ValidationMetrics,
}

impl Forecast for MetricsOverride {
    fn kind(&self) -> ModelKind {
        self.inner.kind()
    }

    fn metrics(&self) -> ValidationMetrics {
        self.metrics
    }

    fn predict(&self, target: Period, features: &[f64]) -> Result<f64, BackfillError> {
        self.inner.predict(target, features)
    }
}

fn with_metrics(inner: Box<dyn Forecast>, metrics: ValidationMetrics) -> Box<dyn Forecast> {
    Box::new(MetricsOverride { inner, metrics })
}

#[cfg(test)]
pub(crate) fn synthetic_series(months: usize, base: f64, slope: f64) -> TrainingSeries {
    use crate::backfill::features::{FeatureBuilder, MacroSeries};
    use crate::domain::PriceObservation;
    use chrono::Utc;

    let history: Vec<PriceObservation> = (0..months)
        .map(|i| {
            let p = Period::new(2018, 1).plus_months(i as u32);
            PriceObservation {
                location_code: "34001".into(),
                property_type: PropertyType::ResidentialSale,
                year: p.year,
                month: p.month,
                avg_price_per_m2: base + slope * i as f64,
                transaction_count: None,
                created_at: Utc::now(),
            }
        })
        .collect();

    let builder = FeatureBuilder::new(1);
    let macros = MacroSeries::default();
    let anchor =
        history.iter().map(|o| o.avg_price_per_m2).sum::<f64>() / history.len() as f64;
    TrainingSeries {
        location_code: "34001".into(),
        property_type: PropertyType::ResidentialSale,
        points: history
            .iter()
            .map(|o| (o.period(), o.avg_price_per_m2))
            .collect(),
        features: history
            .iter()
            .map(|o| builder.build(&history, o.period(), &macros).dense(anchor))
            .collect(),
    }
}
