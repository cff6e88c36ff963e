use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::backfill::ensemble::ConfidencePolicy;
use crate::backfill::orchestrator::OrchestratorSettings;
use crate::domain::Period;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backfill: BackfillSettings,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillSettings {
    pub min_history_months: usize,
    pub concurrency: usize,
    pub per_location_timeout_secs: u64,
    pub price_floor: f64,
    pub disagreement_weight: f64,
    pub density_weight: f64,
    pub single_model_discount: f64,
    pub clamp_discount: f64,
    /// Eligibility reference month override, `{ year, month }`. Unset in
    /// production; fixtures pin it for deterministic runs.
    #[serde(default)]
    pub reference_period: Option<Period>,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        let policy = ConfidencePolicy::default();
        Self {
            min_history_months: 6,
            concurrency: 4,
            per_location_timeout_secs: 120,
            price_floor: 1.0,
            disagreement_weight: policy.disagreement_weight,
            density_weight: policy.density_weight,
            single_model_discount: policy.single_model_discount,
            clamp_discount: policy.clamp_discount,
            reference_period: None,
        }
    }
}

impl BackfillSettings {
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            min_history_months: self.min_history_months,
            concurrency: self.concurrency,
            per_location_timeout: Duration::from_secs(self.per_location_timeout_secs),
            price_floor: self.price_floor,
            reference_period: self.reference_period,
        }
    }

    pub fn confidence_policy(&self) -> ConfidencePolicy {
        ConfidencePolicy {
            disagreement_weight: self.disagreement_weight,
            density_weight: self.density_weight,
            single_model_discount: self.single_model_discount,
            clamp_discount: self.clamp_discount,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Optional JSON fixture loaded into the in-memory store at startup.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("EMLAK__").split("__"));
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backfill_settings() {
        let settings = BackfillSettings::default();
        assert_eq!(settings.min_history_months, 6);
        assert_eq!(settings.concurrency, 4);
        assert!(settings.reference_period.is_none());

        let orchestrator = settings.orchestrator_settings();
        assert_eq!(orchestrator.per_location_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_reference_period_parses() {
        let settings: BackfillSettings = serde_json::from_str(
            r#"{
                "min_history_months": 6,
                "concurrency": 2,
                "per_location_timeout_secs": 30,
                "price_floor": 1.0,
                "disagreement_weight": 0.5,
                "density_weight": 0.5,
                "single_model_discount": 0.85,
                "clamp_discount": 0.5,
                "reference_period": {"year": 2023, "month": 6}
            }"#,
        )
        .unwrap();
        assert_eq!(settings.reference_period, Some(Period::new(2023, 6)));
    }
}
