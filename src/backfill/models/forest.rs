//! Random forest regressor.
//!
//! Conservative parameters: the per-location series are short, so depth and
//! tree count are capped to keep fitting fast and avoid memorizing noise.

use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::domain::{BackfillError, ModelKind, Period};

use super::boosted::feature_matrix;
use super::{Forecast, PriceModel, TrainingSeries, ValidationMetrics};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Default)]
pub struct EnsembleTreeModel;

impl EnsembleTreeModel {
    fn parameters() -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: Some(10),
            min_samples_leaf: 2,
            min_samples_split: 5,
            n_trees: 50,
            m: None, // sqrt(n_features)
            keep_samples: false,
            seed: 42,
        }
    }
}

struct FittedForest {
    model: Forest,
    n_features: usize,
    metrics: ValidationMetrics,
}

impl PriceModel for EnsembleTreeModel {
    fn kind(&self) -> ModelKind {
        ModelKind::EnsembleTree
    }

    fn min_history(&self) -> usize {
        8
    }

    fn fit(&self, series: &TrainingSeries) -> Result<Box<dyn Forecast>, BackfillError> {
        if series.is_empty() {
            return Err(BackfillError::ModelFitFailed(
                "forest fit on empty series".into(),
            ));
        }
        let n_features = series.features[0].len();
        let x = feature_matrix(&series.features)?;
        let y = series.targets();

        let model = Forest::fit(&x, &y, Self::parameters())
            .map_err(|e| BackfillError::ModelFitFailed(format!("forest fit failed: {e}")))?;

        let fitted_values = model
            .predict(&x)
            .map_err(|e| BackfillError::ModelFitFailed(format!("forest predict failed: {e}")))?;
        let metrics = ValidationMetrics::compute(&fitted_values, &y)?;

        Ok(Box::new(FittedForest {
            model,
            n_features,
            metrics,
        }))
    }
}

impl Forecast for FittedForest {
    fn kind(&self) -> ModelKind {
        ModelKind::EnsembleTree
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
        let values = self
            .model
            .predict(&x)
            .map_err(|e| BackfillError::ModelFitFailed(format!("forest predict failed: {e}")))?;
        Ok(values[0])
    }
}
