use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{connection::Database, helpers::parse_datetime, models::LocationSample};

fn row_to_sample(row: &Row) -> Result<LocationSample> {
    let recorded_at: String = row.get("recorded_at")?;

    Ok(LocationSample {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        accuracy: row.get("accuracy")?,
        heading: row.get("heading")?,
        speed: row.get("speed")?,
        recorded_at: parse_datetime(&recorded_at, "recorded_at")?,
    })
}

impl Database {
    /// Appends a sample only if its session is still ACTIVE at write time, and
    /// bumps the session's `updated_at` so a streaming session never looks idle.
    /// Returns `false` when the session is missing or no longer active.
    pub async fn insert_location_sample_if_active(&self, sample: &LocationSample) -> Result<bool> {
        let record = sample.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO location_samples (id, session_id, latitude, longitude, accuracy, heading, speed, recorded_at)
                 SELECT ?1, id, ?3, ?4, ?5, ?6, ?7, ?8
                 FROM sessions
                 WHERE id = ?2 AND status = 'ACTIVE'",
                params![
                    record.id,
                    record.session_id,
                    record.latitude,
                    record.longitude,
                    record.accuracy,
                    record.heading,
                    record.speed,
                    record.recorded_at.to_rfc3339(),
                ],
            )?;
            if inserted == 0 {
                return Ok(false);
            }

            let recorded_at = record.recorded_at.to_rfc3339();
            tx.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2 AND updated_at < ?1",
                params![recorded_at, record.session_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    pub async fn location_history(&self, session_id: &str) -> Result<Vec<LocationSample>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, latitude, longitude, accuracy, heading, speed, recorded_at
                 FROM location_samples
                 WHERE session_id = ?1
                 ORDER BY recorded_at ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut samples = Vec::new();
            while let Some(row) = rows.next()? {
                samples.push(row_to_sample(row)?);
            }
            Ok(samples)
        })
        .await
    }

    /// Deletes samples recorded before `cutoff`, returning how many were removed.
    pub async fn prune_location_samples(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM location_samples WHERE recorded_at < ?1",
                params![cutoff.to_rfc3339()],
            )?;
            Ok(removed)
        })
        .await
    }
}
