//! Missing-period detection over the observation store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{BackfillError, Period, PeriodRange, PropertyType};
use crate::store::ObservationStore;

/// One (location, year, month, segment) tuple lacking an observation.
/// Derived on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingPeriod {
    pub property_type: PropertyType,
    pub year: i32,
    pub month: u32,
}

impl MissingPeriod {
    pub fn period(&self) -> Period {
        Period::new(self.year, self.month)
    }
}

/// Periods of `window` with no entry in `observed`, ascending.
///
/// Pure and deterministic: two calls with the same inputs return the same
/// sequence.
pub fn missing_periods(observed: &BTreeSet<Period>, window: &PeriodRange) -> Vec<Period> {
    window.iter().filter(|p| !observed.contains(p)).collect()
}

pub struct GapDetector {
    observations: Arc<dyn ObservationStore>,
}

impl GapDetector {
    pub fn new(observations: Arc<dyn ObservationStore>) -> Self {
        Self { observations }
    }

    /// Missing periods per location within `window`, for the requested
    /// segments. `locations = None` scans every known location. Locations
    /// with full coverage are omitted from the result; a location with no
    /// observation inside the window at all lists every period of it.
    ///
    /// Output per location is grouped by segment, chronological within each.
    pub async fn detect(
        &self,
        locations: Option<&[String]>,
        window: &PeriodRange,
        property_types: &[PropertyType],
    ) -> Result<BTreeMap<String, Vec<MissingPeriod>>, BackfillError> {
        let locations: Vec<String> = match locations {
            Some(codes) => codes.to_vec(),
            None => self
                .observations
                .location_codes()
                .await
                .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?,
        };

        let mut result = BTreeMap::new();
        for location in locations {
            let mut missing = Vec::new();
            for &property_type in property_types {
                let observed: BTreeSet<Period> = self
                    .observations
                    .find_in_window(&location, property_type, window)
                    .await
                    .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?
                    .iter()
                    .map(|obs| obs.period())
                    .collect();

                missing.extend(missing_periods(&observed, window).into_iter().map(|p| {
                    MissingPeriod {
                        property_type,
                        year: p.year,
                        month: p.month,
                    }
                }));
            }
            if !missing.is_empty() {
                debug!(%location, gaps = missing.len(), "detected missing periods");
                result.insert(location, missing);
            }
        }
        Ok(result)
    }
}
