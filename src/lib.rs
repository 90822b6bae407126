//! Krawl Mode: live, resumable traversal of a krawl's gems with completion
//! tracking, client-reported distance and automatic session closure.

pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod krawl_mode;
pub mod lookup;
mod utils;

use anyhow::Result;
use chrono::Utc;
use log::info;

pub use config::EngineConfig;
pub use db::{ArrivalMethod, Database, LocationSample, NewLocationSample, Session, SessionStatus};
pub use error::KrawlModeError;
pub use geo::distance_meters;
pub use krawl_mode::{KrawlModeController, MaintenanceReport, ProgressView, SessionView};
pub use lookup::{InMemoryDirectory, KrawlLookup, UserLookup};
pub use utils::logging::init_logging;

/// Opens the configured database and runs one maintenance pass.
pub async fn run(config: EngineConfig) -> Result<MaintenanceReport> {
    info!("Krawl Mode maintenance starting...");

    let database = Database::new(config.database_path.clone())?;
    let report = krawl_mode::run_maintenance(&database, &config, Utc::now()).await?;
    Ok(report)
}
