//! Persistence seams for the four collections the backfill core touches.
//!
//! Observations and macro covariates are owned by the external import process
//! and read-only here; predictions and sessions are owned exclusively by this
//! service and append-only.

pub mod memory;
pub mod seed;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    BackfillSession, MacroCovariatePoint, MacroIndicator, PeriodRange, PredictedPriceRecord,
    PriceObservation, PropertyType,
};

#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// All location codes with at least one observation, sorted.
    async fn location_codes(&self) -> Result<Vec<String>>;

    /// Full observed series for a location/segment, ordered by period.
    async fn find_series(
        &self,
        location: &str,
        property_type: PropertyType,
    ) -> Result<Vec<PriceObservation>>;

    /// Observed series restricted to a window, ordered by period.
    async fn find_in_window(
        &self,
        location: &str,
        property_type: PropertyType,
        window: &PeriodRange,
    ) -> Result<Vec<PriceObservation>>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait MacroStore: Send + Sync {
    /// Full series for one indicator, ordered by period. Gaps are allowed;
    /// the feature builder forward-fills from the last known value.
    async fn series(&self, indicator: MacroIndicator) -> Result<Vec<MacroCovariatePoint>>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Append-only write; returns the number of rows persisted.
    async fn append(&self, records: Vec<PredictedPriceRecord>) -> Result<usize>;

    /// Predictions for a location/segment from one session, ordered by period.
    async fn find_series(
        &self,
        location: &str,
        property_type: PropertyType,
        session_id: Uuid,
    ) -> Result<Vec<PredictedPriceRecord>>;

    /// All rows written by one session, for audit listings.
    async fn find_by_session(&self, session_id: Uuid) -> Result<Vec<PredictedPriceRecord>>;

    /// The most recent session that wrote predictions for this
    /// location/segment, if any. Default read path for consumers.
    async fn latest_session_for(
        &self,
        location: &str,
        property_type: PropertyType,
    ) -> Result<Option<Uuid>>;

    async fn count(&self) -> Result<usize>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: BackfillSession) -> Result<()>;

    /// Replaces the stored record for the same session id.
    async fn update(&self, session: BackfillSession) -> Result<()>;

    async fn get(&self, session_id: Uuid) -> Result<Option<BackfillSession>>;

    /// Most recently started session, regardless of status.
    async fn latest(&self) -> Result<Option<BackfillSession>>;
}

/// Handles to every collection, shared across the API and the orchestrator.
#[derive(Clone)]
pub struct Stores {
    pub observations: Arc<dyn ObservationStore>,
    pub macros: Arc<dyn MacroStore>,
    pub predictions: Arc<dyn PredictionStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    /// One shared in-memory backend behind all four traits.
    pub fn in_memory() -> (Self, Arc<memory::MemoryStore>) {
        let backend = Arc::new(memory::MemoryStore::new());
        let stores = Self {
            observations: backend.clone(),
            macros: backend.clone(),
            predictions: backend.clone(),
            sessions: backend.clone(),
        };
        (stores, backend)
    }
}
