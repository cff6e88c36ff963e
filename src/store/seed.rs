//! JSON fixture loading for the in-memory store.
//!
//! Stands in for the external SQL import: a seed file deposits observation
//! and macro-covariate rows at startup so the service has data to scan.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::domain::{MacroCovariatePoint, PriceObservation};

use super::memory::MemoryStore;

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    observations: Vec<PriceObservation>,
    #[serde(default)]
    macro_covariates: Vec<MacroCovariatePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedStats {
    pub observations: usize,
    pub macro_points: usize,
}

pub async fn load_seed(store: &MemoryStore, path: &Path) -> Result<SeedStats> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: SeedFile = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing seed file {}", path.display()))?;

    // Months feed straight into period arithmetic; refuse bad rows up front.
    for obs in &seed.observations {
        ensure!(
            (1..=12).contains(&obs.month),
            "seed observation for {} has month {} out of range",
            obs.location_code,
            obs.month
        );
    }
    for point in &seed.macro_covariates {
        ensure!(
            (1..=12).contains(&point.month),
            "seed macro point {} has month {} out of range",
            point.indicator,
            point.month
        );
    }

    let stats = SeedStats {
        observations: store.insert_observations(seed.observations),
        macro_points: store.insert_macro_points(seed.macro_covariates),
    };
    info!(
        observations = stats.observations,
        macro_points = stats.macro_points,
        path = %path.display(),
        "seed data loaded"
    );
    Ok(stats)
}
