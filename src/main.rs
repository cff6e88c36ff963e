use anyhow::Result;
use axum::Router;
use emlak_backfill::{api, config::Config, store, telemetry};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;

    let (stores, backend) = store::Stores::in_memory();
    if let Some(path) = &cfg.store.seed_file {
        store::seed::load_seed(&backend, path).await?;
    } else {
        warn!("no seed file configured, starting with empty stores");
    }

    let state = api::AppState::new(&cfg, stores);
    let cancel = state.orchestrator.cancellation_token();
    let app: Router = api::router(state, &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0 - accessible from the network");
    }
    info!(%addr, "starting emlak backfill service");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            telemetry::shutdown_signal().await;
            // Stop in-flight backfill work; persisted predictions stay.
            cancel.cancel();
        })
        .await?;

    warn!("shutdown complete");
    Ok(())
}
