use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Session;

/// How the traveller reached a gem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArrivalMethod {
    /// Geofence-triggered.
    #[default]
    Automatic,
    /// User-asserted.
    Manual,
}

impl ArrivalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalMethod::Automatic => "AUTOMATIC",
            ArrivalMethod::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub id: String,
    pub session_id: String,
    pub gem_id: String,
    pub completed_at: DateTime<Utc>,
    pub distance_to_gem_meters: Option<f64>,
    pub arrival_method: ArrivalMethod,
}

/// Ledger state observed inside the completion transaction.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Session after the optional auto-completion.
    pub session: Session,
    /// `false` when the gem had already been completed in this session.
    pub newly_recorded: bool,
    pub completed_gem_ids: Vec<String>,
}
