use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{MacroIndicator, Period, PropertyType};

/// One actually measured price record, written by the external import
/// process. Immutable once stored; the backfill core never produces these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub location_code: String,
    pub property_type: PropertyType,
    pub year: i32,
    pub month: u32,
    /// TRY per m², always positive.
    pub avg_price_per_m2: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_count: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PriceObservation {
    pub fn period(&self) -> Period {
        Period::new(self.year, self.month)
    }
}

/// One macroeconomic indicator value for a month. Read-only to the core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacroCovariatePoint {
    pub indicator: MacroIndicator,
    pub year: i32,
    pub month: u32,
    pub value: f64,
}

impl MacroCovariatePoint {
    pub fn period(&self) -> Period {
        Period::new(self.year, self.month)
    }
}
