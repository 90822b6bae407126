//! Krawl Mode session records.
//!
//! A session is one user's traversal attempt of one krawl. The krawl and user
//! ids are opaque keys owned by external collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Abandoned => "ABANDONED",
        }
    }

    /// `Completed` and `Abandoned` have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub krawl_id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_distance_meters: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: String, krawl_id: String, user_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            krawl_id,
            user_id,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            total_distance_meters: 0.0,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Result of the atomic find-or-create performed for `start`.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session: Session,
    pub created: bool,
}
