//! Derived progress views.
//!
//! Everything here is computed from the ledger and the krawl's live gem
//! sequence at call time. If the sequence is edited mid-session the
//! denominator moves with it, so a percentage may drop below 100 or exceed it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Session, SessionStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub krawl_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub total_distance_meters: f64,
    pub completed_gems_count: usize,
    pub total_gems_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressView {
    pub session_id: String,
    pub completed_gems_count: usize,
    pub total_gems_count: usize,
    pub progress_percentage: f64,
    pub completed_gem_ids: Vec<String>,
    pub next_gem_id: Option<String>,
}

pub fn percentage(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 * 100.0 / total as f64
}

/// First gem in sequence order that has not been completed.
pub fn next_gem_id(ordered_gem_ids: &[String], completed_gem_ids: &[String]) -> Option<String> {
    let completed: HashSet<&str> = completed_gem_ids.iter().map(String::as_str).collect();
    ordered_gem_ids
        .iter()
        .find(|gem_id| !completed.contains(gem_id.as_str()))
        .cloned()
}

pub fn build_snapshot(
    session_id: &str,
    ordered_gem_ids: &[String],
    completed_gem_ids: Vec<String>,
) -> ProgressView {
    let completed_gems_count = completed_gem_ids.len();
    let total_gems_count = ordered_gem_ids.len();

    ProgressView {
        session_id: session_id.to_string(),
        completed_gems_count,
        total_gems_count,
        progress_percentage: percentage(completed_gems_count, total_gems_count),
        next_gem_id: next_gem_id(ordered_gem_ids, &completed_gem_ids),
        completed_gem_ids,
    }
}

pub fn session_view(session: Session, completed_gems_count: usize, total_gems_count: usize) -> SessionView {
    SessionView {
        session_id: session.id,
        krawl_id: session.krawl_id,
        user_id: session.user_id,
        started_at: session.started_at,
        ended_at: session.ended_at,
        status: session.status,
        total_distance_meters: session.total_distance_meters,
        completed_gems_count,
        total_gems_count,
    }
}
