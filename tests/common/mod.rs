#![allow(dead_code)]
//! Shared fixtures for the integration tests.

use std::sync::Arc;

use chrono::Utc;
use emlak_backfill::backfill::ensemble::ConfidencePolicy;
use emlak_backfill::backfill::orchestrator::{BackfillOrchestrator, OrchestratorSettings};
use emlak_backfill::domain::{
    BackfillConfig, MacroCovariatePoint, MacroIndicator, ModelKind, Period, PriceObservation,
    PropertyType,
};
use emlak_backfill::store::{memory::MemoryStore, Stores};

/// Reference month pinned for deterministic eligibility.
pub const REFERENCE: Period = Period {
    year: 2023,
    month: 12,
};

pub fn stores() -> (Stores, Arc<MemoryStore>) {
    Stores::in_memory()
}

pub fn orchestrator(stores: &Stores) -> BackfillOrchestrator {
    let settings = OrchestratorSettings {
        concurrency: 2,
        reference_period: Some(REFERENCE),
        ..OrchestratorSettings::default()
    };
    BackfillOrchestrator::new(stores.clone(), settings, ConfidencePolicy::default())
}

pub fn observation(
    location: &str,
    property_type: PropertyType,
    period: Period,
    price: f64,
) -> PriceObservation {
    PriceObservation {
        location_code: location.to_string(),
        property_type,
        year: period.year,
        month: period.month,
        avg_price_per_m2: price,
        transaction_count: Some(25),
        created_at: Utc::now(),
    }
}

/// Seeds a trending monthly series starting 2022-01, skipping the offsets in
/// `gaps`. 24 months covers the whole default eligibility span up to
/// [`REFERENCE`].
pub fn seed_location(backend: &MemoryStore, location: &str, months: u32, gaps: &[u32]) {
    let start = Period::new(2022, 1);
    let rows: Vec<PriceObservation> = (0..months)
        .filter(|offset| !gaps.contains(offset))
        .map(|offset| {
            observation(
                location,
                PropertyType::ResidentialSale,
                start.plus_months(offset),
                18_000.0 + 250.0 * offset as f64,
            )
        })
        .collect();
    backend.insert_observations(rows);
}

pub fn seed_macros(backend: &MemoryStore) {
    let start = Period::new(2022, 1);
    let rows: Vec<MacroCovariatePoint> = (0..24u32)
        .flat_map(|offset| {
            let p = start.plus_months(offset);
            [
                MacroCovariatePoint {
                    indicator: MacroIndicator::ConsumerPriceIndex,
                    year: p.year,
                    month: p.month,
                    value: 700.0 + 30.0 * offset as f64,
                },
                MacroCovariatePoint {
                    indicator: MacroIndicator::PolicyInterestRate,
                    year: p.year,
                    month: p.month,
                    value: 15.0,
                },
                MacroCovariatePoint {
                    indicator: MacroIndicator::UsdTryRate,
                    year: p.year,
                    month: p.month,
                    value: 18.0 + 0.4 * offset as f64,
                },
            ]
        })
        .collect();
    backend.insert_macro_points(rows);
}

pub fn run_config() -> BackfillConfig {
    BackfillConfig {
        start_date: "2022-01-01".parse().unwrap(),
        end_date: "2023-12-31".parse().unwrap(),
        current_data_months: 12,
        confidence_threshold: 0.7,
        models_to_use: vec![ModelKind::TrendSeasonality, ModelKind::GradientBoosted],
        property_types: Some(vec![PropertyType::ResidentialSale]),
    }
}
