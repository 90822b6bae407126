use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{is_constraint_violation, parse_datetime, parse_optional_datetime, parse_status},
    models::{Session, SessionStatus, StartOutcome},
};

const SESSION_COLUMNS: &str = "id, krawl_id, user_id, status, started_at, ended_at, total_distance_meters, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let status: String = row.get("status")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Session {
        id: row.get("id")?,
        krawl_id: row.get("krawl_id")?,
        user_id: row.get("user_id")?,
        status: parse_status(&status)?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        total_distance_meters: row.get("total_distance_meters")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

pub(crate) fn select_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    Ok(query_sessions(conn, &sql, params![session_id])?.into_iter().next())
}

pub(crate) fn select_active_session(
    conn: &Connection,
    krawl_id: &str,
    user_id: &str,
) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE krawl_id = ?1 AND user_id = ?2 AND status = 'ACTIVE'
         LIMIT 1"
    );
    Ok(query_sessions(conn, &sql, params![krawl_id, user_id])?
        .into_iter()
        .next())
}

fn insert_session(conn: &Connection, record: &Session) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO sessions (id, krawl_id, user_id, status, started_at, ended_at, total_distance_meters, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            record.krawl_id,
            record.user_id,
            record.status.as_str(),
            record.started_at.to_rfc3339(),
            record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
            record.total_distance_meters,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )
}

impl Database {
    /// Returns the ACTIVE session for the pair, creating one if none exists.
    ///
    /// The lookup and insert run as one worker task; the partial unique index
    /// on ACTIVE sessions backs this up if another process shares the file.
    pub async fn find_or_create_active_session(
        &self,
        krawl_id: &str,
        user_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        let krawl_id = krawl_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            if let Some(session) = select_active_session(conn, &krawl_id, &user_id)? {
                return Ok(StartOutcome {
                    session,
                    created: false,
                });
            }

            let session = Session::new(
                Uuid::new_v4().to_string(),
                krawl_id.clone(),
                user_id.clone(),
                started_at,
            );

            match insert_session(conn, &session) {
                Ok(_) => Ok(StartOutcome {
                    session,
                    created: true,
                }),
                Err(err) if is_constraint_violation(&err) => {
                    warn!(
                        "Concurrent start detected for krawl {krawl_id}, user {user_id}; reusing active session"
                    );
                    let session = select_active_session(conn, &krawl_id, &user_id)?
                        .context("active session vanished after uniqueness conflict")?;
                    Ok(StartOutcome {
                        session,
                        created: false,
                    })
                }
                Err(err) => Err(anyhow::Error::new(err).context("failed to insert session")),
            }
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| select_session(conn, &session_id))
            .await
    }

    pub async fn find_active_session(
        &self,
        krawl_id: &str,
        user_id: &str,
    ) -> Result<Option<Session>> {
        let krawl_id = krawl_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| select_active_session(conn, &krawl_id, &user_id))
            .await
    }

    /// Most recently started session for the pair, whatever its status.
    pub async fn find_latest_session(
        &self,
        krawl_id: &str,
        user_id: &str,
    ) -> Result<Option<Session>> {
        let krawl_id = krawl_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE krawl_id = ?1 AND user_id = ?2
                 ORDER BY started_at DESC
                 LIMIT 1"
            );
            Ok(query_sessions(conn, &sql, params![krawl_id, user_id])?
                .into_iter()
                .next())
        })
        .await
    }

    /// Moves the pair's ACTIVE session to ABANDONED. `None` when nothing was active.
    pub async fn abandon_active_session(
        &self,
        krawl_id: &str,
        user_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let krawl_id = krawl_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let Some(session) = select_active_session(conn, &krawl_id, &user_id)? else {
                return Ok(None);
            };

            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     ended_at = ?2,
                     updated_at = ?2
                 WHERE id = ?3 AND status = 'ACTIVE'",
                params![
                    SessionStatus::Abandoned.as_str(),
                    ended_at.to_rfc3339(),
                    session.id,
                ],
            )?;

            select_session(conn, &session.id)
        })
        .await
    }

    /// Overwrites the distance accumulator of the pair's ACTIVE session.
    ///
    /// With `total_distance_meters = None` the session is returned untouched.
    pub async fn update_active_session_distance(
        &self,
        krawl_id: &str,
        user_id: &str,
        total_distance_meters: Option<f64>,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let krawl_id = krawl_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let Some(session) = select_active_session(conn, &krawl_id, &user_id)? else {
                return Ok(None);
            };
            let Some(distance) = total_distance_meters else {
                return Ok(Some(session));
            };

            conn.execute(
                "UPDATE sessions
                 SET total_distance_meters = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![distance, updated_at.to_rfc3339(), session.id],
            )?;

            select_session(conn, &session.id)
        })
        .await
    }

    /// Abandons every ACTIVE session not touched since `cutoff`.
    pub async fn abandon_stale_sessions(
        &self,
        cutoff: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status = 'ACTIVE' AND updated_at < ?1
                 ORDER BY started_at ASC"
            );
            let stale = query_sessions(&tx, &sql, params![cutoff.to_rfc3339()])?;

            let mut abandoned = Vec::with_capacity(stale.len());
            for session in stale {
                tx.execute(
                    "UPDATE sessions
                     SET status = ?1,
                         ended_at = ?2,
                         updated_at = ?2
                     WHERE id = ?3",
                    params![
                        SessionStatus::Abandoned.as_str(),
                        ended_at.to_rfc3339(),
                        session.id,
                    ],
                )?;
                debug!("Abandoned stale session {}", session.id);
                if let Some(updated) = select_session(&tx, &session.id)? {
                    abandoned.push(updated);
                }
            }

            tx.commit()?;
            Ok(abandoned)
        })
        .await
    }

    /// Session history for a user, newest first.
    pub async fn list_user_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1
                 ORDER BY started_at DESC"
            );
            query_sessions(conn, &sql, params![user_id])
        })
        .await
    }
}
