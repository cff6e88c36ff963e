//! Per-location ensemble: fit the configured models, combine their point
//! estimates, and score confidence at one boundary.

use itertools::Itertools;
use tracing::warn;

use crate::domain::{BackfillError, ModelKind, Period, PriceObservation, PropertyType};

use super::features::{FeatureBuilder, MacroSeries};
use super::models::{self, Forecast, TrainingSeries, ValidationMetrics};

/// One backfilled month before persistence.
#[derive(Debug, Clone)]
pub struct PeriodPrediction {
    pub period: Period,
    pub price: f64,
    pub confidence: f64,
    /// The raw combined estimate was non-positive and got clamped to the
    /// price floor.
    pub clamped: bool,
}

/// Output of one location/segment fit: chronological predictions plus what
/// was actually fitted, for session-level reporting.
#[derive(Debug)]
pub struct EnsembleOutcome {
    pub predictions: Vec<PeriodPrediction>,
    pub models_fit: Vec<ModelKind>,
    pub reports: Vec<(ModelKind, ValidationMetrics)>,
}

/// Every confidence score passes through [`ConfidencePolicy::score`]; there
/// is deliberately no other place that produces one.
///
/// The score blends model agreement (inverse relative spread between the
/// fitted models' estimates) with local data density around the target month.
/// A single-model run has no spread signal, so it takes a flat discount on
/// the density term instead.
#[derive(Debug, Clone, Copy)]
pub struct ConfidencePolicy {
    pub disagreement_weight: f64,
    pub density_weight: f64,
    pub single_model_discount: f64,
    pub clamp_discount: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            disagreement_weight: 0.5,
            density_weight: 0.5,
            single_model_discount: 0.85,
            clamp_discount: 0.5,
        }
    }
}

impl ConfidencePolicy {
    /// `spread` is the relative standard deviation across model estimates,
    /// `None` when only one model produced a value. `density` is in [0, 1].
    /// Always lands in [0, 1].
    pub fn score(&self, spread: Option<f64>, density: f64, clamped: bool) -> f64 {
        let density = density.clamp(0.0, 1.0);
        let base = match spread {
            Some(spread) => {
                let agreement = 1.0 / (1.0 + spread.max(0.0));
                self.disagreement_weight * agreement + self.density_weight * density
            }
            None => self.single_model_discount * density,
        };
        let score = if clamped {
            base * self.clamp_discount
        } else {
            base
        };
        score.clamp(0.0, 1.0)
    }
}

/// Observed months within +-6 of the target, as a fraction of that window.
fn local_density(history: &[PriceObservation], target: Period) -> f64 {
    let nearby = history
        .iter()
        .filter(|obs| obs.period().months_until(&target).abs() <= 6)
        .count();
    (nearby as f64 / 13.0).clamp(0.0, 1.0)
}

pub struct ModelEnsemble {
    pub builder: FeatureBuilder,
    pub policy: ConfidencePolicy,
    /// Combined estimates at or below zero clamp to this positive floor.
    pub price_floor: f64,
}

impl ModelEnsemble {
    /// Fits the requested model kinds on the observed series and predicts
    /// every missing month.
    ///
    /// Models that cannot fit (too little history, or a fit error) are
    /// logged and dropped; the ensemble proceeds with whatever remains.
    /// Fails only when no model at all could be fitted.
    pub fn fit_and_predict(
        &self,
        location: &str,
        property_type: PropertyType,
        history: &[PriceObservation],
        missing: &[Period],
        kinds: &[ModelKind],
        macros: &MacroSeries,
    ) -> Result<EnsembleOutcome, BackfillError> {
        self.builder.history_check(history)?;

        let anchor = history.iter().map(|o| o.avg_price_per_m2).sum::<f64>()
            / history.len() as f64;
        let series = TrainingSeries {
            location_code: location.to_string(),
            property_type,
            points: history
                .iter()
                .map(|o| (o.period(), o.avg_price_per_m2))
                .collect(),
            features: history
                .iter()
                .map(|o| self.builder.build(history, o.period(), macros).dense(anchor))
                .collect(),
        };

        let mut fitted: Vec<Box<dyn Forecast>> = Vec::new();
        let mut reports = Vec::new();
        for &kind in kinds.iter().unique() {
            let model = models::model_for(kind);
            if series.len() < model.min_history() {
                warn!(
                    location,
                    %property_type,
                    model = %kind,
                    observed = series.len(),
                    required = model.min_history(),
                    "skipping model, series too short"
                );
                continue;
            }
            match models::fit_with_holdout(model, &series) {
                Ok(forecast) => {
                    reports.push((kind, forecast.metrics()));
                    fitted.push(forecast);
                }
                Err(e) => {
                    warn!(location, %property_type, model = %kind, error = %e, "model fit failed");
                }
            }
        }
        if fitted.is_empty() {
            return Err(BackfillError::ModelFitFailed(format!(
                "no configured model could be fitted for {location}/{property_type}"
            )));
        }

        let mut targets = missing.to_vec();
        targets.sort_unstable();
        targets.dedup();

        let mut predictions = Vec::with_capacity(targets.len());
        for target in targets {
            let row = self.builder.build(history, target, macros).dense(anchor);
            let mut estimates = Vec::with_capacity(fitted.len());
            for forecast in &fitted {
                match forecast.predict(target, &row) {
                    Ok(value) => estimates.push(value),
                    Err(e) => warn!(
                        location,
                        %property_type,
                        model = %forecast.kind(),
                        %target,
                        error = %e,
                        "model prediction failed"
                    ),
                }
            }
            if estimates.is_empty() {
                warn!(location, %property_type, %target, "no model produced an estimate");
                continue;
            }

            let mean = estimates.iter().sum::<f64>() / estimates.len() as f64;
            let spread = if estimates.len() >= 2 {
                let var = estimates.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                    / (estimates.len() - 1) as f64;
                Some(var.sqrt() / mean.abs().max(f64::EPSILON))
            } else {
                None
            };

            let clamped = mean <= 0.0;
            let price = if clamped { self.price_floor } else { mean };
            let confidence = self
                .policy
                .score(spread, local_density(history, target), clamped);
            predictions.push(PeriodPrediction {
                period: target,
                price,
                confidence,
                clamped,
            });
        }

        Ok(EnsembleOutcome {
            predictions,
            models_fit: fitted.iter().map(|f| f.kind()).collect(),
            reports,
        })
    }
}

/// Persisted provenance string: fitted model names joined with `+`.
pub fn provenance(models_fit: &[ModelKind]) -> String {
    models_fit.iter().map(ModelKind::to_string).join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obs(year: i32, month: u32, price: f64) -> PriceObservation {
        PriceObservation {
            location_code: "34001".into(),
            property_type: PropertyType::ResidentialSale,
            year,
            month,
            avg_price_per_m2: price,
            transaction_count: None,
            created_at: Utc::now(),
        }
    }

    /// 2018-01 onward, linear upward trend, one gap at the given offset.
    fn trending_history(months: usize, skip_offset: u32) -> (Vec<PriceObservation>, Period) {
        let start = Period::new(2018, 1);
        let gap = start.plus_months(skip_offset);
        let history = (0..months as u32)
            .filter(|&i| i != skip_offset)
            .map(|i| {
                let p = start.plus_months(i);
                obs(p.year, p.month, 10_000.0 + 150.0 * i as f64)
            })
            .collect();
        (history, gap)
    }

    fn ensemble() -> ModelEnsemble {
        ModelEnsemble {
            builder: FeatureBuilder::new(6),
            policy: ConfidencePolicy::default(),
            price_floor: 1.0,
        }
    }

    #[test]
    fn test_confidence_policy_bounds() {
        let policy = ConfidencePolicy::default();
        assert_eq!(policy.score(Some(0.0), 1.0, false), 1.0);
        assert!(policy.score(Some(1e9), 0.0, false) >= 0.0);
        assert!(policy.score(None, 1.0, false) <= 1.0);
        // Clamp discount halves the score.
        let clean = policy.score(Some(0.1), 0.8, false);
        let clamped = policy.score(Some(0.1), 0.8, true);
        assert!((clamped - clean * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_interpolated_gap_lands_between_neighbors() {
        let (history, gap) = trending_history(24, 12);
        let outcome = ensemble()
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &[gap],
                &[ModelKind::TrendSeasonality, ModelKind::GradientBoosted],
                &MacroSeries::default(),
            )
            .unwrap();

        assert_eq!(outcome.predictions.len(), 1);
        let p = &outcome.predictions[0];
        // Neighbors are 10_000 + 150*11 and 10_000 + 150*13.
        assert!(
            p.price > 11_000.0 && p.price < 12_500.0,
            "price={}",
            p.price
        );
        assert!(p.confidence > 0.0 && p.confidence <= 1.0);
        assert!(!p.clamped);
        assert_eq!(outcome.models_fit.len(), 2);
        assert_eq!(outcome.reports.len(), 2);
    }

    #[test]
    fn test_multi_model_agreement_beats_single_model() {
        let (history, gap) = trending_history(24, 12);
        let e = ensemble();

        let multi = e
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &[gap],
                &[ModelKind::TrendSeasonality, ModelKind::GradientBoosted],
                &MacroSeries::default(),
            )
            .unwrap();
        let single = e
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &[gap],
                &[ModelKind::TrendSeasonality],
                &MacroSeries::default(),
            )
            .unwrap();

        assert!(
            multi.predictions[0].confidence > single.predictions[0].confidence,
            "multi={} single={}",
            multi.predictions[0].confidence,
            single.predictions[0].confidence
        );
    }

    #[test]
    fn test_insufficient_history_propagates() {
        let history: Vec<PriceObservation> = (1..=3).map(|m| obs(2020, m, 10_000.0)).collect();
        let err = ensemble()
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &[Period::new(2020, 6)],
                &[ModelKind::TrendSeasonality],
                &MacroSeries::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BackfillError::InsufficientHistory { .. }));
    }

    #[test]
    fn test_no_fittable_model_fails() {
        // Enough history for the builder, too short for the trend model.
        let history: Vec<PriceObservation> = (1..=7).map(|m| obs(2020, m, 10_000.0)).collect();
        let err = ensemble()
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &[Period::new(2020, 9)],
                &[ModelKind::TrendSeasonality],
                &MacroSeries::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BackfillError::ModelFitFailed(_)));
    }

    #[test]
    fn test_negative_estimate_clamped_with_discount() {
        // Steep downward trend so extrapolation a year out goes negative.
        let history: Vec<PriceObservation> = (0..14)
            .map(|i| {
                let p = Period::new(2018, 1).plus_months(i);
                obs(p.year, p.month, 2_000.0 - 160.0 * i as f64)
            })
            .collect();
        let target = Period::new(2018, 1).plus_months(26);
        let outcome = ensemble()
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &[target],
                &[ModelKind::TrendSeasonality],
                &MacroSeries::default(),
            )
            .unwrap();

        let p = &outcome.predictions[0];
        assert!(p.clamped);
        assert_eq!(p.price, 1.0);
        assert!(p.confidence < 0.5);
    }

    #[test]
    fn test_predictions_chronological() {
        let (history, _) = trending_history(24, 30);
        let targets = vec![
            Period::new(2020, 6),
            Period::new(2020, 2),
            Period::new(2020, 4),
        ];
        let outcome = ensemble()
            .fit_and_predict(
                "34001",
                PropertyType::ResidentialSale,
                &history,
                &targets,
                &[ModelKind::TrendSeasonality],
                &MacroSeries::default(),
            )
            .unwrap();

        let periods: Vec<Period> = outcome.predictions.iter().map(|p| p.period).collect();
        assert_eq!(
            periods,
            vec![
                Period::new(2020, 2),
                Period::new(2020, 4),
                Period::new(2020, 6)
            ]
        );
    }

    #[test]
    fn test_provenance_string() {
        assert_eq!(
            provenance(&[ModelKind::TrendSeasonality, ModelKind::EnsembleTree]),
            "trend_seasonality+ensemble_tree"
        );
        assert_eq!(provenance(&[ModelKind::GradientBoosted]), "gradient_boosted");
    }
}
