pub mod api;
pub mod backfill;
pub mod config;
pub mod domain;
pub mod store;
pub mod telemetry;
