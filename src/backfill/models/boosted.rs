//! Gradient boosting over shallow regression trees.
//!
//! Residual boosting with a fixed learning rate: each round fits a depth-
//! limited tree to the remaining residuals. Replaces the external boosting
//! library of the reference stack with the same base learner family.

use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use crate::domain::{BackfillError, ModelKind, Period};

use super::{Forecast, PriceModel, TrainingSeries, ValidationMetrics};

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug)]
pub struct GradientBoostedModel {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: u16,
}

impl Default for GradientBoostedModel {
    fn default() -> Self {
        Self {
            n_rounds: 50,
            learning_rate: 0.1,
            max_depth: 3,
        }
    }
}

struct FittedBoosted {
    base: f64,
    learning_rate: f64,
    trees: Vec<Tree>,
    n_features: usize,
    metrics: ValidationMetrics,
}

pub(super) fn feature_matrix(rows: &[Vec<f64>]) -> Result<DenseMatrix<f64>, BackfillError> {
    let n_samples = rows.len();
    let n_features = rows.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(n_samples * n_features);
    for row in rows {
        if row.len() != n_features {
            return Err(BackfillError::ModelFitFailed(format!(
                "ragged feature rows: expected {n_features}, got {}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(n_samples, n_features, flat, false))
}

impl PriceModel for GradientBoostedModel {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosted
    }

    fn min_history(&self) -> usize {
        8
    }

    fn fit(&self, series: &TrainingSeries) -> Result<Box<dyn Forecast>, BackfillError> {
        if series.is_empty() {
            return Err(BackfillError::ModelFitFailed(
                "boosting fit on empty series".into(),
            ));
        }
        let n_features = series.features[0].len();
        let x = feature_matrix(&series.features)?;
        let y = series.targets();

        let base = y.iter().sum::<f64>() / y.len() as f64;
        let mut residuals: Vec<f64> = y.iter().map(|v| v - base).collect();
        let mut trees = Vec::with_capacity(self.n_rounds);

        for _ in 0..self.n_rounds {
            let params = DecisionTreeRegressorParameters::default()
                .with_max_depth(self.max_depth)
                .with_min_samples_leaf(2);
            let tree = Tree::fit(&x, &residuals, params)
                .map_err(|e| BackfillError::ModelFitFailed(format!("tree round failed: {e}")))?;
            let round: Vec<f64> = tree
                .predict(&x)
                .map_err(|e| BackfillError::ModelFitFailed(format!("tree predict failed: {e}")))?;
            for (r, p) in residuals.iter_mut().zip(&round) {
                *r -= self.learning_rate * p;
            }
            trees.push(tree);
        }

        // Training-set metrics; the holdout wrapper replaces them when a
        // validation tail exists.
        let fitted_values: Vec<f64> = residuals.iter().zip(&y).map(|(r, v)| v - r).collect();
        let metrics = ValidationMetrics::compute(&fitted_values, &y)?;

        Ok(Box::new(FittedBoosted {
            base,
            learning_rate: self.learning_rate,
            trees,
            n_features,
            metrics,
        }))
    }
}

impl Forecast for FittedBoosted {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosted
    }

    fn metrics(&self) -> ValidationMetrics {
        self.metrics
    }

    fn predict(&self, _target: Period, features: &[f64]) -> Result<f64, BackfillError> {
        if features.len() != self.n_features {
            return Err(BackfillError::ModelFitFailed(format!(
                "feature width mismatch: expected {}, got {}",
                self.n_features,
                features.len()
            )));
        }
        let x = DenseMatrix::new(1, self.n_features, features.to_vec(), false);
        let mut value = self.base;
        for tree in &self.trees {
            let round = tree
                .predict(&x)
                .map_err(|e| BackfillError::ModelFitFailed(format!("tree predict failed: {e}")))?;
            value += self.learning_rate * round[0];
        }
        Ok(value)
    }
}
