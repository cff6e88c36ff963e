//! The backfill pipeline: gap detection, feature engineering, the model
//! ensemble and the run orchestrator.

pub mod ensemble;
pub mod features;
pub mod gaps;
pub mod models;
pub mod orchestrator;
pub mod results;
