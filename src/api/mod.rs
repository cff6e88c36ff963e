pub mod backfill;
pub mod error;
pub mod health;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::backfill::orchestrator::BackfillOrchestrator;
use crate::backfill::results::ResultsReader;
use crate::config::Config;
use crate::store::Stores;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub orchestrator: Arc<BackfillOrchestrator>,
    pub results: Arc<ResultsReader>,
}

impl AppState {
    pub fn new(cfg: &Config, stores: Stores) -> Self {
        let orchestrator = Arc::new(BackfillOrchestrator::new(
            stores.clone(),
            cfg.backfill.orchestrator_settings(),
            cfg.backfill.confidence_policy(),
        ));
        let results = Arc::new(ResultsReader::new(stores.clone()));
        Self {
            stores,
            orchestrator,
            results,
        }
    }
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    let api = Router::new()
        .route("/backfill/detect-missing", post(backfill::detect_missing))
        .route("/backfill/run", post(backfill::run_backfill))
        .route("/backfill/visualization", get(backfill::visualization))
        .route("/backfill/results", get(backfill::results))
        .route("/health", get(health::health))
        .with_state(state);

    let mut router = Router::new().nest("/api", api);

    if cfg.server.enable_cors {
        use tower_http::cors::{Any, CorsLayer};
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]);
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    cfg.server.request_timeout_secs,
                ))),
        )
        .layer(TraceLayer::new_for_http())
}
