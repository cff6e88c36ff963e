use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use super::error::BackfillError;

/// One month of the index, e.g. 2021-07.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPeriod")]
pub struct Period {
    pub year: i32,
    /// 1-12
    pub month: u32,
}

/// Wire shape for [`Period`]; the conversion enforces the month range on
/// every deserialized value (config, requests, seed files).
#[derive(Deserialize)]
struct RawPeriod {
    year: i32,
    month: u32,
}

impl TryFrom<RawPeriod> for Period {
    type Error = BackfillError;

    fn try_from(raw: RawPeriod) -> Result<Self, Self::Error> {
        if !(1..=12).contains(&raw.month) {
            return Err(BackfillError::Configuration(format!(
                "period month out of range: {}",
                raw.month
            )));
        }
        Ok(Self {
            year: raw.year,
            month: raw.month,
        })
    }
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month), "month out of range: {month}");
        Self { year, month }
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Months since year 0, used for arithmetic and trend features.
    pub fn index(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_index(idx: i64) -> Self {
        Self {
            year: idx.div_euclid(12) as i32,
            month: (idx.rem_euclid(12) + 1) as u32,
        }
    }

    pub fn next(&self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn plus_months(&self, n: u32) -> Self {
        Self::from_index(self.index() + n as i64)
    }

    pub fn minus_months(&self, n: u32) -> Self {
        Self::from_index(self.index() - n as i64)
    }

    /// Signed distance in months from `self` to `other`.
    pub fn months_until(&self, other: &Period) -> i64 {
        other.index() - self.index()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = BackfillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| BackfillError::Configuration(format!("invalid period: {s:?}")))?;
        let year: i32 = y
            .parse()
            .map_err(|_| BackfillError::Configuration(format!("invalid period year: {s:?}")))?;
        let month: u32 = m
            .parse()
            .map_err(|_| BackfillError::Configuration(format!("invalid period month: {s:?}")))?;
        if !(1..=12).contains(&month) {
            return Err(BackfillError::Configuration(format!(
                "period month out of range: {s:?}"
            )));
        }
        Ok(Self { year, month })
    }
}

/// Closed month window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: Period,
    pub end: Period,
}

impl PeriodRange {
    pub fn new(start: Period, end: Period) -> Result<Self, BackfillError> {
        if start > end {
            return Err(BackfillError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        (self.start.months_until(&self.end) + 1) as usize
    }

    pub fn contains(&self, p: &Period) -> bool {
        *p >= self.start && *p <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = Period> {
        (self.start.index()..=self.end.index()).map(Period::from_index)
    }
}

/// Property segment of the index.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PropertyType {
    ResidentialSale,
    ResidentialRent,
    CommercialSale,
    CommercialRent,
    LandSale,
}

impl PropertyType {
    pub fn all() -> Vec<PropertyType> {
        PropertyType::iter().collect()
    }
}

/// Macroeconomic covariate series identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MacroIndicator {
    ConsumerPriceIndex,
    PolicyInterestRate,
    UsdTryRate,
}

impl MacroIndicator {
    pub fn all() -> Vec<MacroIndicator> {
        MacroIndicator::iter().collect()
    }
}

/// Forecasting strategies the ensemble can run.
///
/// Legacy identifiers from the admin frontend (`prophet`, `xgboost`,
/// `random_forest`) are accepted as request aliases.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelKind {
    #[serde(alias = "prophet")]
    TrendSeasonality,
    #[serde(alias = "xgboost")]
    GradientBoosted,
    #[serde(alias = "random_forest")]
    EnsembleTree,
}
