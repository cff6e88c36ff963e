//! In-memory store backend.
//!
//! Keyed the same way the external collections are: observations by
//! (location, segment, period), macro covariates by (indicator, period).
//! Predictions are an append-only vector; observation invariants (at most one
//! row per key) are enforced on insert.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{
    BackfillSession, MacroCovariatePoint, MacroIndicator, Period, PeriodRange,
    PredictedPriceRecord, PriceObservation, PropertyType,
};

use super::{MacroStore, ObservationStore, PredictionStore, SessionStore};

#[derive(Default)]
struct Inner {
    observations: BTreeMap<(String, PropertyType), BTreeMap<Period, PriceObservation>>,
    macros: HashMap<MacroIndicator, BTreeMap<Period, MacroCovariatePoint>>,
    predictions: Vec<PredictedPriceRecord>,
    sessions: Vec<BackfillSession>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Seeds observations; a duplicate (location, segment, period) key keeps
    /// the first row, matching the import invariant.
    pub fn insert_observations(&self, rows: Vec<PriceObservation>) -> usize {
        let mut inner = self.inner.write();
        let mut inserted = 0;
        for obs in rows {
            let key = (obs.location_code.clone(), obs.property_type);
            let series = inner.observations.entry(key).or_default();
            if let std::collections::btree_map::Entry::Vacant(slot) = series.entry(obs.period()) {
                slot.insert(obs);
                inserted += 1;
            }
        }
        inserted
    }

    pub fn insert_macro_points(&self, rows: Vec<MacroCovariatePoint>) -> usize {
        let mut inner = self.inner.write();
        let mut inserted = 0;
        for point in rows {
            let series = inner.macros.entry(point.indicator).or_default();
            if let std::collections::btree_map::Entry::Vacant(slot) = series.entry(point.period()) {
                slot.insert(point);
                inserted += 1;
            }
        }
        inserted
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn location_codes(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut codes: Vec<String> = inner
            .observations
            .keys()
            .map(|(location, _)| location.clone())
            .collect();
        codes.sort();
        codes.dedup();
        Ok(codes)
    }

    async fn find_series(
        &self,
        location: &str,
        property_type: PropertyType,
    ) -> Result<Vec<PriceObservation>> {
        let inner = self.inner.read();
        Ok(inner
            .observations
            .get(&(location.to_string(), property_type))
            .map(|series| series.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_in_window(
        &self,
        location: &str,
        property_type: PropertyType,
        window: &PeriodRange,
    ) -> Result<Vec<PriceObservation>> {
        let inner = self.inner.read();
        Ok(inner
            .observations
            .get(&(location.to_string(), property_type))
            .map(|series| {
                series
                    .range(window.start..=window.end)
                    .map(|(_, obs)| obs.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self) -> Result<usize> {
        let inner = self.inner.read();
        Ok(inner.observations.values().map(BTreeMap::len).sum())
    }
}

#[async_trait]
impl MacroStore for MemoryStore {
    async fn series(&self, indicator: MacroIndicator) -> Result<Vec<MacroCovariatePoint>> {
        let inner = self.inner.read();
        Ok(inner
            .macros
            .get(&indicator)
            .map(|series| series.values().copied().collect())
            .unwrap_or_default())
    }

    async fn count(&self) -> Result<usize> {
        let inner = self.inner.read();
        Ok(inner.macros.values().map(BTreeMap::len).sum())
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn append(&self, records: Vec<PredictedPriceRecord>) -> Result<usize> {
        let mut inner = self.inner.write();
        let n = records.len();
        inner.predictions.extend(records);
        Ok(n)
    }

    async fn find_series(
        &self,
        location: &str,
        property_type: PropertyType,
        session_id: Uuid,
    ) -> Result<Vec<PredictedPriceRecord>> {
        let inner = self.inner.read();
        let mut rows: Vec<PredictedPriceRecord> = inner
            .predictions
            .iter()
            .filter(|r| {
                r.session_id == session_id
                    && r.location_code == location
                    && r.property_type == property_type
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.period());
        Ok(rows)
    }

    async fn find_by_session(&self, session_id: Uuid) -> Result<Vec<PredictedPriceRecord>> {
        let inner = self.inner.read();
        let mut rows: Vec<PredictedPriceRecord> = inner
            .predictions
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.location_code, a.property_type, a.period()).cmp(&(
                &b.location_code,
                b.property_type,
                b.period(),
            ))
        });
        Ok(rows)
    }

    async fn latest_session_for(
        &self,
        location: &str,
        property_type: PropertyType,
    ) -> Result<Option<Uuid>> {
        let inner = self.inner.read();
        Ok(inner
            .predictions
            .iter()
            .filter(|r| r.location_code == location && r.property_type == property_type)
            .max_by_key(|r| r.created_at)
            .map(|r| r.session_id))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().predictions.len())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: BackfillSession) -> Result<()> {
        self.inner.write().sessions.push(session);
        Ok(())
    }

    async fn update(&self, session: BackfillSession) -> Result<()> {
        let mut inner = self.inner.write();
        match inner
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(slot) => {
                *slot = session;
                Ok(())
            }
            None => anyhow::bail!("unknown session: {}", session.session_id),
        }
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<BackfillSession>> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    async fn latest(&self) -> Result<Option<BackfillSession>> {
        let inner = self.inner.read();
        Ok(inner
            .sessions
            .iter()
            .max_by_key(|s| s.started_at)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obs(location: &str, year: i32, month: u32, price: f64) -> PriceObservation {
        PriceObservation {
            location_code: location.to_string(),
            property_type: PropertyType::ResidentialSale,
            year,
            month,
            avg_price_per_m2: price,
            transaction_count: Some(10),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_observation_queries() {
        let store = MemoryStore::new();
        store.insert_observations(vec![
            obs("34001", 2020, 3, 12_000.0),
            obs("34001", 2020, 1, 10_000.0),
            obs("06001", 2020, 1, 8_000.0),
        ]);

        let codes = store.location_codes().await.unwrap();
        assert_eq!(codes, vec!["06001", "34001"]);

        let series =
            ObservationStore::find_series(&store, "34001", PropertyType::ResidentialSale)
                .await
                .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].period(), Period::new(2020, 1));

        let window =
            PeriodRange::new(Period::new(2020, 2), Period::new(2020, 12)).unwrap();
        let windowed = store
            .find_in_window("34001", PropertyType::ResidentialSale, &window)
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].period(), Period::new(2020, 3));
    }

    #[tokio::test]
    async fn test_duplicate_observation_keeps_first() {
        let store = MemoryStore::new();
        let inserted = store.insert_observations(vec![
            obs("34001", 2020, 1, 10_000.0),
            obs("34001", 2020, 1, 99_999.0),
        ]);
        assert_eq!(inserted, 1);

        let series =
            ObservationStore::find_series(&store, "34001", PropertyType::ResidentialSale)
                .await
                .unwrap();
        assert_eq!(series[0].avg_price_per_m2, 10_000.0);
    }

    #[tokio::test]
    async fn test_prediction_append_and_latest_session() {
        let store = MemoryStore::new();
        let older = Uuid::new_v4();
        let newer = Uuid::new_v4();
        let mut first = PredictedPriceRecord {
            id: Uuid::new_v4(),
            location_code: "34001".into(),
            property_type: PropertyType::ResidentialSale,
            year: 2020,
            month: 1,
            predicted_price_per_m2: 11_000.0,
            confidence_score: 0.8,
            model_used: "trend_seasonality".into(),
            session_id: older,
            is_predicted: true,
            created_at: Utc::now(),
        };
        store.append(vec![first.clone()]).await.unwrap();

        first.id = Uuid::new_v4();
        first.session_id = newer;
        first.created_at = Utc::now() + chrono::Duration::seconds(1);
        store.append(vec![first]).await.unwrap();

        assert_eq!(PredictionStore::count(&store).await.unwrap(), 2);
        let latest = store
            .latest_session_for("34001", PropertyType::ResidentialSale)
            .await
            .unwrap();
        assert_eq!(latest, Some(newer));
    }
}
