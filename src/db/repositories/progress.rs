use anyhow::Result;
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{parse_arrival_method, parse_datetime},
    models::{ArrivalMethod, CompletionOutcome, ProgressEntry, SessionStatus},
    repositories::sessions::select_session,
};

fn row_to_entry(row: &Row) -> Result<ProgressEntry> {
    let completed_at: String = row.get("completed_at")?;
    let arrival_method: String = row.get("arrival_method")?;

    Ok(ProgressEntry {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        gem_id: row.get("gem_id")?,
        completed_at: parse_datetime(&completed_at, "completed_at")?,
        distance_to_gem_meters: row.get("distance_to_gem_meters")?,
        arrival_method: parse_arrival_method(&arrival_method)?,
    })
}

fn select_completed_gem_ids(conn: &Connection, session_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT gem_id FROM progress_entries
         WHERE session_id = ?1
         ORDER BY completed_at ASC",
    )?;
    let mut rows = stmt.query(params![session_id])?;
    let mut gem_ids = Vec::new();
    while let Some(row) = rows.next()? {
        gem_ids.push(row.get(0)?);
    }
    Ok(gem_ids)
}

impl Database {
    /// Records a gem completion and applies the auto-completion rule.
    ///
    /// Runs in one transaction: the conditional insert, the ledger read and
    /// the COMPLETED transition all see the same state. A duplicate
    /// `(session, gem)` pair is absorbed by the unique constraint and reported
    /// as `newly_recorded = false`. Returns `None` when the session is no
    /// longer ACTIVE.
    pub async fn record_gem_completion(
        &self,
        session_id: &str,
        gem_id: &str,
        distance_to_gem_meters: Option<f64>,
        arrival_method: ArrivalMethod,
        total_gems: usize,
        completed_at: DateTime<Utc>,
    ) -> Result<Option<CompletionOutcome>> {
        let session_id = session_id.to_string();
        let gem_id = gem_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            match select_session(&tx, &session_id)? {
                Some(session) if session.is_active() => {}
                _ => return Ok(None),
            }

            let inserted = tx.execute(
                "INSERT INTO progress_entries (id, session_id, gem_id, completed_at, distance_to_gem_meters, arrival_method)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (session_id, gem_id) DO NOTHING",
                params![
                    Uuid::new_v4().to_string(),
                    session_id,
                    gem_id,
                    completed_at.to_rfc3339(),
                    distance_to_gem_meters,
                    arrival_method.as_str(),
                ],
            )?;
            if inserted == 0 {
                debug!("Gem {gem_id} already completed in session {session_id}");
            }

            let completed_gem_ids = select_completed_gem_ids(&tx, &session_id)?;
            if completed_gem_ids.len() >= total_gems {
                tx.execute(
                    "UPDATE sessions
                     SET status = ?1,
                         ended_at = ?2,
                         updated_at = ?2
                     WHERE id = ?3 AND status = 'ACTIVE'",
                    params![
                        SessionStatus::Completed.as_str(),
                        completed_at.to_rfc3339(),
                        session_id,
                    ],
                )?;
            } else if inserted > 0 {
                tx.execute(
                    "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                    params![completed_at.to_rfc3339(), session_id],
                )?;
            }

            let session = select_session(&tx, &session_id)?;
            tx.commit()?;

            Ok(session.map(|session| CompletionOutcome {
                session,
                newly_recorded: inserted > 0,
                completed_gem_ids,
            }))
        })
        .await
    }

    /// Gem ids completed in a session, in completion order.
    pub async fn completed_gem_ids(&self, session_id: &str) -> Result<Vec<String>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| select_completed_gem_ids(conn, &session_id))
            .await
    }

    pub async fn count_completed_gems(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM progress_entries WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn list_progress_entries(&self, session_id: &str) -> Result<Vec<ProgressEntry>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, gem_id, completed_at, distance_to_gem_meters, arrival_method
                 FROM progress_entries
                 WHERE session_id = ?1
                 ORDER BY completed_at ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn active_session(db: &Database) -> String {
        db.find_or_create_active_session("k1", "u1", Utc::now())
            .await
            .unwrap()
            .session
            .id
    }

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("krawl.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn duplicate_completion_is_absorbed() {
        let (_dir, db) = open();
        let session_id = active_session(&db).await;

        let first = db
            .record_gem_completion(&session_id, "g1", Some(4.2), ArrivalMethod::Automatic, 3, Utc::now())
            .await
            .unwrap()
            .unwrap();
        let second = db
            .record_gem_completion(&session_id, "g1", None, ArrivalMethod::Manual, 3, Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert!(first.newly_recorded);
        assert!(!second.newly_recorded);
        assert_eq!(second.completed_gem_ids, vec!["g1".to_string()]);

        let entries = db.list_progress_entries(&session_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].arrival_method, ArrivalMethod::Automatic);
        assert_eq!(entries[0].distance_to_gem_meters, Some(4.2));
    }

    #[tokio::test]
    async fn last_gem_completes_session() {
        let (_dir, db) = open();
        let session_id = active_session(&db).await;

        let partial = db
            .record_gem_completion(&session_id, "g1", None, ArrivalMethod::Manual, 2, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(partial.session.status, SessionStatus::Active);

        let done = db
            .record_gem_completion(&session_id, "g2", None, ArrivalMethod::Manual, 2, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.session.status, SessionStatus::Completed);
        assert!(done.session.ended_at.is_some());
        assert_eq!(db.count_completed_gems(&session_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn inactive_session_is_not_written() {
        let (_dir, db) = open();
        let session_id = active_session(&db).await;
        db.abandon_active_session("k1", "u1", Utc::now()).await.unwrap();

        let outcome = db
            .record_gem_completion(&session_id, "g1", None, ArrivalMethod::Manual, 3, Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(db.completed_gem_ids(&session_id).await.unwrap().is_empty());
    }
}
