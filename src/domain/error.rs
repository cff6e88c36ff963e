use thiserror::Error;

use super::types::Period;

/// Errors produced by the backfill core.
///
/// `InsufficientHistory` and `ModelFitFailed` are per-location and non-fatal.
/// A segment with too little history to model is skipped rather than failed;
/// fit errors are recorded in the session and the run moves on.
/// `InvalidWindow` and `Configuration` are structural and fail the run before
/// any location is processed.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow { start: Period, end: Period },

    #[error("insufficient history: {observed} observed months, {required} required")]
    InsufficientHistory { observed: usize, required: usize },

    #[error("model fit failed: {0}")]
    ModelFitFailed(String),

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BackfillError {
    /// Whether the orchestrator may continue with other locations.
    pub fn is_location_local(&self) -> bool {
        matches!(
            self,
            BackfillError::InsufficientHistory { .. }
                | BackfillError::ModelFitFailed(_)
                | BackfillError::PersistenceFailure(_)
        )
    }
}
