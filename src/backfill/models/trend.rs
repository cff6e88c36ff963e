//! Linear trend plus monthly seasonal indices.
//!
//! Closed-form least squares on the month axis, with per-calendar-month mean
//! residuals as additive seasonal adjustments. Stands in for the full
//! seasonal-decomposition forecaster of the reference stack without pulling
//! in an external solver.

use crate::backfill::features::TREND_EPOCH;
use crate::domain::{BackfillError, ModelKind, Period};

use super::{Forecast, PriceModel, TrainingSeries, ValidationMetrics};

#[derive(Debug, Default)]
pub struct TrendSeasonalityModel;

struct FittedTrend {
    intercept: f64,
    slope: f64,
    /// Additive adjustment per calendar month, index 0 = January.
    seasonal: [f64; 12],
    metrics: ValidationMetrics,
}

impl TrendSeasonalityModel {
    fn evaluate(intercept: f64, slope: f64, seasonal: &[f64; 12], target: Period) -> f64 {
        let t = TREND_EPOCH.months_until(&target) as f64;
        intercept + slope * t + seasonal[target.month as usize - 1]
    }
}

impl PriceModel for TrendSeasonalityModel {
    fn kind(&self) -> ModelKind {
        ModelKind::TrendSeasonality
    }

    // A full year, so every seasonal index has a chance to be observed.
    fn min_history(&self) -> usize {
        12
    }

    fn fit(&self, series: &TrainingSeries) -> Result<Box<dyn Forecast>, BackfillError> {
        if series.len() < 2 {
            return Err(BackfillError::ModelFitFailed(format!(
                "trend fit needs at least 2 points, got {}",
                series.len()
            )));
        }

        let n = series.len() as f64;
        let xs: Vec<f64> = series
            .points
            .iter()
            .map(|(p, _)| TREND_EPOCH.months_until(p) as f64)
            .collect();
        let ys: Vec<f64> = series.targets();

        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = ys.iter().sum::<f64>() / n;
        let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
        if sxx == 0.0 {
            return Err(BackfillError::ModelFitFailed(
                "trend fit needs at least 2 distinct months".into(),
            ));
        }
        let sxy: f64 = xs
            .iter()
            .zip(&ys)
            .map(|(x, y)| (x - x_mean) * (y - y_mean))
            .sum();
        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;

        // Mean residual per calendar month; months never observed stay at
        // zero adjustment.
        let mut sums = [0.0f64; 12];
        let mut counts = [0u32; 12];
        for ((period, y), &x) in series.points.iter().zip(&xs) {
            let idx = period.month as usize - 1;
            sums[idx] += y - (intercept + slope * x);
            counts[idx] += 1;
        }
        let mut seasonal = [0.0f64; 12];
        for idx in 0..12 {
            if counts[idx] > 0 {
                seasonal[idx] = sums[idx] / counts[idx] as f64;
            }
        }

        let fitted_values: Vec<f64> = series
            .points
            .iter()
            .map(|&(p, _)| Self::evaluate(intercept, slope, &seasonal, p))
            .collect();
        let metrics = ValidationMetrics::compute(&fitted_values, &ys)?;

        Ok(Box::new(FittedTrend {
            intercept,
            slope,
            seasonal,
            metrics,
        }))
    }
}

impl Forecast for FittedTrend {
    fn kind(&self) -> ModelKind {
        ModelKind::TrendSeasonality
    }

    fn metrics(&self) -> ValidationMetrics {
        self.metrics
    }

    fn predict(&self, target: Period, _features: &[f64]) -> Result<f64, BackfillError> {
        Ok(TrendSeasonalityModel::evaluate(
            self.intercept,
            self.slope,
            &self.seasonal,
            target,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::synthetic_series;
    use super::*;

    #[test]
    fn test_recovers_linear_trend() {
        // 10_000 + 150/month starting 2018-01.
        let series = synthetic_series(24, 10_000.0, 150.0);
        let fitted = TrendSeasonalityModel.fit(&series).unwrap();

        // Interpolation at a mid-series month and extrapolation one step out.
        let mid = fitted.predict(Period::new(2019, 1), &[]).unwrap();
        assert!((mid - 11_800.0).abs() < 1.0);
        let next = fitted.predict(Period::new(2020, 1), &[]).unwrap();
        assert!((next - 13_600.0).abs() < 1.0);
        assert!(fitted.metrics().rmse < 1.0);
    }

    #[test]
    fn test_learns_seasonal_pattern() {
        // Flat base with a +500 bump every June, two years of it.
        let mut series = synthetic_series(24, 10_000.0, 0.0);
        for (period, price) in series.points.iter_mut() {
            if period.month == 6 {
                *price += 500.0;
            }
        }
        let fitted = TrendSeasonalityModel.fit(&series).unwrap();

        let june = fitted.predict(Period::new(2020, 6), &[]).unwrap();
        let july = fitted.predict(Period::new(2020, 7), &[]).unwrap();
        assert!(june - july > 400.0, "june={june} july={july}");
    }

    #[test]
    fn test_degenerate_series_rejected() {
        let series = synthetic_series(1, 10_000.0, 0.0);
        assert!(matches!(
            TrendSeasonalityModel.fit(&series),
            Err(BackfillError::ModelFitFailed(_))
        ));
    }
}
