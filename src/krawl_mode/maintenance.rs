use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::{config::EngineConfig, db::Database, error::Result};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub abandoned_sessions: usize,
    pub pruned_location_samples: usize,
}

/// Abandons idle ACTIVE sessions and drops location samples past retention.
pub async fn run_maintenance(
    db: &Database,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport> {
    let stale = db
        .abandon_stale_sessions(now - config.stale_session_after(), now)
        .await?;
    for session in &stale {
        warn!(
            "Abandoned stale session {} (krawl {}, user {})",
            session.id, session.krawl_id, session.user_id
        );
    }

    let pruned = db
        .prune_location_samples(now - config.location_retention())
        .await?;

    let report = MaintenanceReport {
        abandoned_sessions: stale.len(),
        pruned_location_samples: pruned,
    };
    info!(
        "Maintenance finished: {} stale sessions abandoned, {} location samples pruned",
        report.abandoned_sessions, report.pruned_location_samples
    );
    Ok(report)
}
