//! Run orchestration: eligibility, gap detection, ensemble fitting and
//! persistence for every location, under a bounded worker pool.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    BackfillConfig, BackfillError, BackfillSession, LocationError, MacroIndicator, ModelKind,
    ModelReport, Period, PeriodRange, PredictedPriceRecord, PriceObservation, PropertyType,
    SessionStatus,
};
use crate::store::Stores;

use super::ensemble::{provenance, ConfidencePolicy, ModelEnsemble};
use super::features::{FeatureBuilder, MacroSeries};
use super::gaps::{missing_periods, GapDetector, MissingPeriod};
use super::models::ValidationMetrics;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Observed months a series needs before models are attempted.
    pub min_history_months: usize,
    /// Locations processed concurrently.
    pub concurrency: usize,
    pub per_location_timeout: Duration,
    /// Clamp floor for non-positive combined estimates.
    pub price_floor: f64,
    /// Eligibility reference month; `None` means the current month.
    /// Injected in tests to keep eligibility deterministic.
    pub reference_period: Option<Period>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            min_history_months: 6,
            concurrency: 4,
            per_location_timeout: Duration::from_secs(120),
            price_floor: 1.0,
            reference_period: None,
        }
    }
}

/// What one location worker produced. Folded into the session afterwards so
/// the gather stage never touches shared mutable state.
struct LocationOutcome {
    location: String,
    /// Predictions computed, eligible segments only.
    computed: u32,
    persisted: u32,
    low_confidence: u32,
    confidence_sum: f64,
    models_fit: BTreeSet<ModelKind>,
    reports: Vec<(ModelKind, ValidationMetrics)>,
    errors: Vec<String>,
    /// Models ran (or a store error was recorded) for at least one segment.
    /// Segments with too little history to model stay unattempted.
    attempted: bool,
    cancelled: bool,
}

impl LocationOutcome {
    fn empty(location: String) -> Self {
        Self {
            location,
            computed: 0,
            persisted: 0,
            low_confidence: 0,
            confidence_sum: 0.0,
            models_fit: BTreeSet::new(),
            reports: Vec::new(),
            errors: Vec::new(),
            attempted: false,
            cancelled: false,
        }
    }
}

pub struct BackfillOrchestrator {
    stores: Stores,
    settings: OrchestratorSettings,
    policy: ConfidencePolicy,
    cancel: CancellationToken,
}

impl BackfillOrchestrator {
    pub fn new(stores: Stores, settings: OrchestratorSettings, policy: ConfidencePolicy) -> Self {
        Self {
            stores,
            settings,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts in-flight work on shutdown. Predictions already
    /// persisted stay persisted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Gap scan without any side effect: every location, no eligibility
    /// filter, nothing persisted.
    pub async fn detect(
        &self,
        config: &BackfillConfig,
    ) -> Result<BTreeMap<String, Vec<MissingPeriod>>, BackfillError> {
        let window = config.validated_window()?;
        GapDetector::new(self.stores.observations.clone())
            .detect(None, &window, &config.property_types())
            .await
    }

    /// Executes one full backfill run and returns the closed session record.
    ///
    /// Structural failures (bad config, unreachable store) return `Err`
    /// before any session exists. Once a session is open, per-location
    /// failures are recorded in it and the run keeps going; the run itself
    /// only closes as `Failed` when it was cancelled or when every attempted
    /// location failed.
    pub async fn run(&self, config: BackfillConfig) -> Result<BackfillSession, BackfillError> {
        let window = config.validated_window()?;
        let locations = self
            .stores
            .observations
            .location_codes()
            .await
            .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?;
        let macros = self.load_macro_series().await?;

        let mut session = BackfillSession::open(config.clone());
        self.stores
            .sessions
            .insert(session.clone())
            .await
            .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?;
        info!(
            session_id = %session.session_id,
            window = %format_args!("{}..{}", window.start, window.end),
            locations = locations.len(),
            "backfill run started"
        );

        let reference = self
            .settings
            .reference_period
            .unwrap_or_else(|| Period::from_date(Utc::now().date_naive()));
        let property_types = config.property_types();

        let outcomes: Vec<LocationOutcome> = stream::iter(locations)
            .map(|location| {
                let config = config.clone();
                let property_types = property_types.clone();
                let macros = macros.clone();
                self.process_location_guarded(
                    location,
                    config,
                    window,
                    reference,
                    property_types,
                    macros,
                    session.session_id,
                )
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        self.fold_outcomes(&mut session, outcomes);
        session.finished_at = Some(Utc::now());
        info!(
            session_id = %session.session_id,
            status = ?session.status,
            processed = session.locations_processed,
            skipped = session.locations_skipped,
            predictions = session.predictions_persisted,
            "backfill run finished"
        );

        if let Err(e) = self.stores.sessions.update(session.clone()).await {
            error!(session_id = %session.session_id, error = %e, "session update failed");
        }
        Ok(session)
    }

    async fn load_macro_series(&self) -> Result<MacroSeries, BackfillError> {
        let mut points = Vec::new();
        for indicator in MacroIndicator::all() {
            points.extend(
                self.stores
                    .macros
                    .series(indicator)
                    .await
                    .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?,
            );
        }
        Ok(MacroSeries::from_points(points))
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_location_guarded(
        &self,
        location: String,
        config: BackfillConfig,
        window: PeriodRange,
        reference: Period,
        property_types: Vec<PropertyType>,
        macros: MacroSeries,
        session_id: Uuid,
    ) -> LocationOutcome {
        if self.cancel.is_cancelled() {
            let mut outcome = LocationOutcome::empty(location);
            outcome.cancelled = true;
            return outcome;
        }
        let timeout = self.settings.per_location_timeout;
        match tokio::time::timeout(
            timeout,
            self.process_location(
                &location,
                &config,
                &window,
                reference,
                &property_types,
                &macros,
                session_id,
            ),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%location, ?timeout, "location timed out");
                let mut outcome = LocationOutcome::empty(location);
                outcome.attempted = true;
                outcome.errors.push(
                    BackfillError::ModelFitFailed(format!("timed out after {timeout:?}"))
                        .to_string(),
                );
                outcome
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_location(
        &self,
        location: &str,
        config: &BackfillConfig,
        window: &PeriodRange,
        reference: Period,
        property_types: &[PropertyType],
        macros: &MacroSeries,
        session_id: Uuid,
    ) -> LocationOutcome {
        let mut outcome = LocationOutcome::empty(location.to_string());
        let ensemble = ModelEnsemble {
            builder: FeatureBuilder::new(self.settings.min_history_months),
            policy: self.policy,
            price_floor: self.settings.price_floor,
        };

        for &property_type in property_types {
            match self
                .eligible(location, property_type, config.current_data_months, reference)
                .await
            {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    outcome.attempted = true;
                    outcome.errors.push(e.to_string());
                    continue;
                }
            }

            let history = match self
                .stores
                .observations
                .find_series(location, property_type)
                .await
            {
                Ok(history) => history,
                Err(e) => {
                    outcome.attempted = true;
                    outcome
                        .errors
                        .push(BackfillError::PersistenceFailure(e.to_string()).to_string());
                    continue;
                }
            };

            let observed: BTreeSet<Period> = history
                .iter()
                .map(PriceObservation::period)
                .filter(|p| window.contains(p))
                .collect();
            let missing = missing_periods(&observed, window);
            if missing.is_empty() {
                continue;
            }

            match ensemble.fit_and_predict(
                location,
                property_type,
                &history,
                &missing,
                &config.models_to_use,
                macros,
            ) {
                Ok(result) => {
                    outcome.attempted = true;
                    let model_used = provenance(&result.models_fit);
                    let records: Vec<PredictedPriceRecord> = result
                        .predictions
                        .iter()
                        .map(|p| PredictedPriceRecord {
                            id: Uuid::new_v4(),
                            location_code: location.to_string(),
                            property_type,
                            year: p.period.year,
                            month: p.period.month,
                            predicted_price_per_m2: p.price,
                            confidence_score: p.confidence,
                            model_used: model_used.clone(),
                            session_id,
                            is_predicted: true,
                            created_at: Utc::now(),
                        })
                        .collect();

                    outcome.computed += records.len() as u32;
                    outcome.low_confidence += result
                        .predictions
                        .iter()
                        .filter(|p| p.confidence < config.confidence_threshold)
                        .count() as u32;
                    outcome.confidence_sum +=
                        result.predictions.iter().map(|p| p.confidence).sum::<f64>();
                    outcome.models_fit.extend(result.models_fit.iter().copied());
                    outcome.reports.extend(result.reports);

                    match self.stores.predictions.append(records).await {
                        Ok(n) => outcome.persisted += n as u32,
                        Err(e) => {
                            error!(%location, %property_type, error = %e, "prediction append failed");
                            outcome
                                .errors
                                .push(BackfillError::PersistenceFailure(e.to_string()).to_string());
                        }
                    }
                }
                // Too little history to model is a skip, not a failure: the
                // segment stays unattempted and shows up in the skip count.
                Err(BackfillError::InsufficientHistory { observed, required }) => {
                    info!(%location, %property_type, observed, required, "segment skipped");
                }
                Err(e) if e.is_location_local() => {
                    warn!(%location, %property_type, error = %e, "segment backfill failed");
                    outcome.attempted = true;
                    outcome.errors.push(e.to_string());
                }
                Err(e) => {
                    outcome.attempted = true;
                    outcome.errors.push(e.to_string());
                }
            }
        }
        outcome
    }

    /// A location/segment is eligible when it has at least
    /// `current_data_months` observed months within the twice-as-long span
    /// ending at the reference month.
    async fn eligible(
        &self,
        location: &str,
        property_type: PropertyType,
        current_data_months: u32,
        reference: Period,
    ) -> Result<bool, BackfillError> {
        let span = PeriodRange::new(
            reference.minus_months(current_data_months * 2 - 1),
            reference,
        )?;
        let observed = self
            .stores
            .observations
            .find_in_window(location, property_type, &span)
            .await
            .map_err(|e| BackfillError::PersistenceFailure(e.to_string()))?;
        Ok(observed.len() >= current_data_months as usize)
    }

    fn fold_outcomes(&self, session: &mut BackfillSession, outcomes: Vec<LocationOutcome>) {
        let mut attempted = 0u32;
        let mut failed = 0u32;
        let mut cancelled = false;
        let mut models_fit: BTreeSet<ModelKind> = BTreeSet::new();
        let mut report_acc: BTreeMap<ModelKind, (u32, f64, f64, f64)> = BTreeMap::new();

        for outcome in outcomes {
            cancelled |= outcome.cancelled;
            if !outcome.attempted {
                if !outcome.cancelled {
                    session.locations_skipped += 1;
                }
                continue;
            }
            attempted += 1;
            if outcome.computed > 0 {
                session.locations_processed += 1;
            } else if !outcome.errors.is_empty() {
                failed += 1;
            }
            session.total_predictions += outcome.computed;
            session.predictions_persisted += outcome.persisted;
            session.low_confidence_count += outcome.low_confidence;
            session.avg_confidence += outcome.confidence_sum;
            models_fit.extend(outcome.models_fit);
            for (kind, metrics) in outcome.reports {
                let acc = report_acc.entry(kind).or_insert((0, 0.0, 0.0, 0.0));
                acc.0 += 1;
                acc.1 += metrics.rmse;
                acc.2 += metrics.mae;
                acc.3 += metrics.r2;
            }
            for error in outcome.errors {
                session.location_errors.push(LocationError {
                    location_code: outcome.location.clone(),
                    error,
                });
            }
        }

        session.avg_confidence = if session.total_predictions > 0 {
            session.avg_confidence / session.total_predictions as f64
        } else {
            0.0
        };
        session.models_used = models_fit.into_iter().collect();
        session.model_reports = report_acc
            .into_iter()
            .map(|(model, (n, rmse, mae, r2))| ModelReport {
                model,
                locations_fit: n,
                mean_rmse: rmse / n as f64,
                mean_mae: mae / n as f64,
                mean_r2: r2 / n as f64,
            })
            .collect();

        if cancelled {
            session.status = SessionStatus::Failed;
            session.error = Some("run cancelled before completion".into());
        } else if attempted > 0 && session.locations_processed == 0 && failed == attempted {
            session.status = SessionStatus::Failed;
            session.error = Some("every attempted location failed".into());
        } else {
            session.status = SessionStatus::Completed;
        }
    }
}
