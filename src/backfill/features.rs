//! Feature engineering for the supervised regressors.
//!
//! Every feature for a target month is computed strictly from observations
//! before that month, so fitting on observed months never leaks the target.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use crate::domain::{
    BackfillError, MacroCovariatePoint, MacroIndicator, Period, PriceObservation,
};

/// Trend features count months from here, keeping the regressor inputs in a
/// small range for the historical window this index covers.
pub const TREND_EPOCH: Period = Period {
    year: 2016,
    month: 1,
};

/// A macro covariate resolved for a target month. `staleness_months` is zero
/// when the indicator was published for that exact month and grows as the
/// forward-fill reaches further back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroReading {
    pub value: f64,
    pub staleness_months: u32,
}

/// The three indicator series, keyed by period for forward-fill lookups.
#[derive(Debug, Default, Clone)]
pub struct MacroSeries {
    cpi: BTreeMap<Period, f64>,
    interest_rate: BTreeMap<Period, f64>,
    usd_try: BTreeMap<Period, f64>,
}

impl MacroSeries {
    pub fn from_points(points: Vec<MacroCovariatePoint>) -> Self {
        let mut series = Self::default();
        for point in points {
            let map = match point.indicator {
                MacroIndicator::ConsumerPriceIndex => &mut series.cpi,
                MacroIndicator::PolicyInterestRate => &mut series.interest_rate,
                MacroIndicator::UsdTryRate => &mut series.usd_try,
            };
            map.entry(point.period()).or_insert(point.value);
        }
        series
    }

    /// Last published value at or before `period`, with its staleness.
    pub fn latest_at(&self, indicator: MacroIndicator, period: Period) -> Option<MacroReading> {
        let map = match indicator {
            MacroIndicator::ConsumerPriceIndex => &self.cpi,
            MacroIndicator::PolicyInterestRate => &self.interest_rate,
            MacroIndicator::UsdTryRate => &self.usd_try,
        };
        map.range(..=period).next_back().map(|(p, &value)| {
            MacroReading {
                value,
                staleness_months: p.months_until(&period) as u32,
            }
        })
    }
}

/// Features for one target month. Lags and rolling statistics stay `None`
/// when the backing observations are absent; the dense encoding marks those
/// with availability indicators instead of silently zero-filling.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceFeatures {
    pub target: Period,
    pub lag_1: Option<f64>,
    pub lag_3: Option<f64>,
    pub lag_12: Option<f64>,
    pub rolling_mean_3: Option<f64>,
    pub rolling_std_3: Option<f64>,
    pub rolling_mean_12: Option<f64>,
    pub rolling_std_12: Option<f64>,
    pub month_sin: f64,
    pub month_cos: f64,
    pub year_trend: f64,
    pub cpi: Option<MacroReading>,
    pub interest_rate: Option<MacroReading>,
    pub usd_try: Option<MacroReading>,
}

pub const FEATURE_NAMES: [&str; 20] = [
    "lag_1",
    "lag_1_present",
    "lag_3",
    "lag_3_present",
    "lag_12",
    "lag_12_present",
    "rolling_mean_3",
    "rolling_std_3",
    "rolling_mean_12",
    "rolling_std_12",
    "rolling_present",
    "month_sin",
    "month_cos",
    "year_trend",
    "cpi",
    "cpi_staleness",
    "interest_rate",
    "interest_rate_staleness",
    "usd_try",
    "usd_try_staleness",
];

impl PriceFeatures {
    /// Fixed-width numeric encoding for the regressors.
    ///
    /// Absent price features are imputed from `anchor` (the location's
    /// observed mean) and flagged through the `_present` columns; absent
    /// macro readings encode as zero with maximal staleness.
    pub fn dense(&self, anchor: f64) -> Vec<f64> {
        let present = |v: Option<f64>| if v.is_some() { 1.0 } else { 0.0 };
        let macro_cols = |reading: Option<MacroReading>| match reading {
            Some(r) => [r.value, r.staleness_months as f64],
            None => [0.0, 120.0],
        };
        let rolling_present = if self.rolling_mean_3.is_some() || self.rolling_mean_12.is_some() {
            1.0
        } else {
            0.0
        };
        let [cpi, cpi_stale] = macro_cols(self.cpi);
        let [rate, rate_stale] = macro_cols(self.interest_rate);
        let [usd, usd_stale] = macro_cols(self.usd_try);
        vec![
            self.lag_1.unwrap_or(anchor),
            present(self.lag_1),
            self.lag_3.unwrap_or(anchor),
            present(self.lag_3),
            self.lag_12.unwrap_or(anchor),
            present(self.lag_12),
            self.rolling_mean_3.unwrap_or(anchor),
            self.rolling_std_3.unwrap_or(0.0),
            self.rolling_mean_12.unwrap_or(anchor),
            self.rolling_std_12.unwrap_or(0.0),
            rolling_present,
            self.month_sin,
            self.month_cos,
            self.year_trend,
            cpi,
            cpi_stale,
            rate,
            rate_stale,
            usd,
            usd_stale,
        ]
    }
}

/// Builds [`PriceFeatures`] from a location's observed series.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder {
    /// Minimum observed months a series needs before any model is attempted.
    pub min_history: usize,
}

impl FeatureBuilder {
    pub fn new(min_history: usize) -> Self {
        Self { min_history }
    }

    pub fn history_check(&self, history: &[PriceObservation]) -> Result<(), BackfillError> {
        if history.len() < self.min_history {
            return Err(BackfillError::InsufficientHistory {
                observed: history.len(),
                required: self.min_history,
            });
        }
        Ok(())
    }

    /// Features for `target`, using only observations strictly before it.
    /// `history` must be ordered by period.
    pub fn build(
        &self,
        history: &[PriceObservation],
        target: Period,
        macros: &MacroSeries,
    ) -> PriceFeatures {
        let prior: BTreeMap<Period, f64> = history
            .iter()
            .filter(|obs| obs.period() < target)
            .map(|obs| (obs.period(), obs.avg_price_per_m2))
            .collect();

        let lag = |n: u32| prior.get(&target.minus_months(n)).copied();
        let rolling = |n: u32| {
            let from = target.minus_months(n);
            let values: Vec<f64> = prior
                .range(from..target)
                .map(|(_, &price)| price)
                .collect();
            rolling_stats(&values)
        };
        let (rolling_mean_3, rolling_std_3) = rolling(3);
        let (rolling_mean_12, rolling_std_12) = rolling(12);

        let angle = 2.0 * PI * target.month as f64 / 12.0;
        PriceFeatures {
            target,
            lag_1: lag(1),
            lag_3: lag(3),
            lag_12: lag(12),
            rolling_mean_3,
            rolling_std_3,
            rolling_mean_12,
            rolling_std_12,
            month_sin: angle.sin(),
            month_cos: angle.cos(),
            year_trend: TREND_EPOCH.months_until(&target) as f64,
            cpi: macros.latest_at(MacroIndicator::ConsumerPriceIndex, target),
            interest_rate: macros.latest_at(MacroIndicator::PolicyInterestRate, target),
            usd_try: macros.latest_at(MacroIndicator::UsdTryRate, target),
        }
    }
}

/// Mean over present values; sample std only when two or more are present.
fn rolling_stats(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if values.len() < 2 {
        return (Some(mean), None);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    (Some(mean), Some(var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyType;
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

    fn macro_point(indicator: MacroIndicator, year: i32, month: u32, value: f64) -> MacroCovariatePoint {
        MacroCovariatePoint {
            indicator,
            year,
            month,
            value,
        }
    }

    #[test]
    fn test_lags_and_rolling_exclude_target_and_future() {
        // 2020-01..2020-06 observed, plus a future month that must be ignored.
        let mut history: Vec<PriceObservation> = (1..=6)
            .map(|m| obs(2020, m, 10_000.0 + m as f64 * 100.0))
            .collect();
        history.push(obs(2020, 9, 99_999.0));
        let builder = FeatureBuilder::new(3);
        let features = builder.build(&history, Period::new(2020, 7), &MacroSeries::default());

        assert_eq!(features.lag_1, Some(10_600.0));
        assert_eq!(features.lag_3, Some(10_400.0));
        assert_eq!(features.lag_12, None);
        // Rolling 3: months 04..06.
        assert_eq!(features.rolling_mean_3, Some(10_500.0));
        assert!(features.rolling_std_3.unwrap() > 0.0);
        // Rolling 12 sees all six prior months, none of the future one.
        assert_eq!(features.rolling_mean_12, Some(10_350.0));
    }

    #[test]
    fn test_no_prior_history_yields_absent_features() {
        let history = vec![obs(2020, 5, 10_000.0)];
        let builder = FeatureBuilder::new(1);
        let features = builder.build(&history, Period::new(2020, 3), &MacroSeries::default());

        assert_eq!(features.lag_1, None);
        assert_eq!(features.rolling_mean_12, None);
        // Dense encoding imputes from the anchor and flags absence.
        let dense = features.dense(10_000.0);
        assert_eq!(dense.len(), FEATURE_NAMES.len());
        assert_eq!(dense[0], 10_000.0); // lag_1 imputed
        assert_eq!(dense[1], 0.0); // lag_1_present
        assert_eq!(dense[10], 0.0); // rolling_present
    }

    #[test]
    fn test_calendar_and_trend_features() {
        let builder = FeatureBuilder::new(1);
        let features = builder.build(&[], Period::new(2017, 1), &MacroSeries::default());
        assert_eq!(features.year_trend, 12.0);
        // December: sin(2*pi) ~ 0, cos ~ 1.
        let december = builder.build(&[], Period::new(2020, 12), &MacroSeries::default());
        assert!(december.month_sin.abs() < 1e-9);
        assert!((december.month_cos - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_macro_forward_fill_staleness() {
        let macros = MacroSeries::from_points(vec![
            macro_point(MacroIndicator::ConsumerPriceIndex, 2020, 1, 112.0),
            macro_point(MacroIndicator::ConsumerPriceIndex, 2020, 4, 118.0),
        ]);

        let exact = macros
            .latest_at(MacroIndicator::ConsumerPriceIndex, Period::new(2020, 4))
            .unwrap();
        assert_eq!(exact.value, 118.0);
        assert_eq!(exact.staleness_months, 0);

        let filled = macros
            .latest_at(MacroIndicator::ConsumerPriceIndex, Period::new(2020, 3))
            .unwrap();
        assert_eq!(filled.value, 112.0);
        assert_eq!(filled.staleness_months, 2);

        assert!(macros
            .latest_at(MacroIndicator::ConsumerPriceIndex, Period::new(2019, 12))
            .is_none());
        assert!(macros
            .latest_at(MacroIndicator::UsdTryRate, Period::new(2020, 6))
            .is_none());
    }

    #[test]
    fn test_history_check() {
        let builder = FeatureBuilder::new(6);
        let short: Vec<PriceObservation> = (1..=4).map(|m| obs(2020, m, 10_000.0)).collect();
        let err = builder.history_check(&short).unwrap_err();
        assert!(matches!(
            err,
            BackfillError::InsufficientHistory {
                observed: 4,
                required: 6
            }
        ));

        let enough: Vec<PriceObservation> = (1..=6).map(|m| obs(2020, m, 10_000.0)).collect();
        assert!(builder.history_check(&enough).is_ok());
    }
}
