use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::db::models::{ArrivalMethod, SessionStatus};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_status(value: &str) -> Result<SessionStatus> {
    match value {
        "ACTIVE" => Ok(SessionStatus::Active),
        "COMPLETED" => Ok(SessionStatus::Completed),
        "ABANDONED" => Ok(SessionStatus::Abandoned),
        other => Err(anyhow!("unknown session status {other}")),
    }
}

pub fn parse_arrival_method(value: &str) -> Result<ArrivalMethod> {
    match value {
        "AUTOMATIC" => Ok(ArrivalMethod::Automatic),
        "MANUAL" => Ok(ArrivalMethod::Manual),
        other => Err(anyhow!("unknown arrival method {other}")),
    }
}

/// True when the error is a SQLite constraint violation (unique index hit).
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
