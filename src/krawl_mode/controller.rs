use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use crate::{
    config::EngineConfig,
    db::{ArrivalMethod, Database, LocationSample, NewLocationSample, Session, SessionStatus},
    error::{KrawlModeError, Result},
    lookup::{KrawlLookup, UserLookup},
};

use super::{
    location::LocationRecorder,
    progress::{build_snapshot, session_view, ProgressView, SessionView},
};

/// Session lifecycle manager.
///
/// `ACTIVE -> COMPLETED` happens only through [`complete_gem`] covering every
/// gem; `ACTIVE -> ABANDONED` through [`stop`] or stale-session maintenance.
/// Both are terminal.
///
/// [`complete_gem`]: KrawlModeController::complete_gem
/// [`stop`]: KrawlModeController::stop
#[derive(Clone)]
pub struct KrawlModeController {
    db: Database,
    krawls: Arc<dyn KrawlLookup>,
    users: Arc<dyn UserLookup>,
    locations: LocationRecorder,
}

fn require_user(user_id: Option<&str>) -> Result<&str> {
    match user_id.map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(KrawlModeError::Unauthenticated(
            "caller identity is required".into(),
        )),
    }
}

fn require_non_negative(value: Option<f64>, field: &str) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(KrawlModeError::InvalidArgument(format!(
            "{field} must be a finite, non-negative number (got {v})"
        ))),
        _ => Ok(()),
    }
}

fn active_session_not_found(krawl_id: &str, user_id: &str) -> KrawlModeError {
    KrawlModeError::not_found("Active session", format!("{krawl_id}/{user_id}"))
}

impl KrawlModeController {
    pub fn new(
        db: Database,
        krawls: Arc<dyn KrawlLookup>,
        users: Arc<dyn UserLookup>,
        config: &EngineConfig,
    ) -> Self {
        let locations = LocationRecorder::new(db.clone(), config.location_history_enabled);
        Self {
            db,
            krawls,
            users,
            locations,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Starts a session, or returns the pair's existing ACTIVE one unchanged.
    pub async fn start(&self, krawl_id: &str, user_id: Option<&str>) -> Result<SessionView> {
        let user_id = require_user(user_id)?;
        debug!("Starting Krawl Mode session for krawl {krawl_id}, user {user_id}");

        if !self.krawls.exists(krawl_id).await? {
            return Err(KrawlModeError::not_found("Krawl", krawl_id));
        }
        if !self.users.exists(user_id).await? {
            return Err(KrawlModeError::Unauthenticated(format!(
                "user {user_id} not found"
            )));
        }

        let outcome = self
            .db
            .find_or_create_active_session(krawl_id, user_id, Utc::now())
            .await?;
        if outcome.created {
            info!("Created Krawl Mode session {}", outcome.session.id);
        } else {
            debug!("Returning existing active session {}", outcome.session.id);
        }

        self.to_session_view(outcome.session).await
    }

    /// Abandons the pair's ACTIVE session. Not idempotent: a second stop is `NotFound`.
    pub async fn stop(&self, krawl_id: &str, user_id: Option<&str>) -> Result<SessionView> {
        let user_id = require_user(user_id)?;
        debug!("Stopping Krawl Mode session for krawl {krawl_id}, user {user_id}");

        // Resolve the krawl before writing so a lookup failure leaves the session untouched.
        let total = self.ordered_gems(krawl_id).await?.len();
        let session = self
            .db
            .abandon_active_session(krawl_id, user_id, Utc::now())
            .await?
            .ok_or_else(|| active_session_not_found(krawl_id, user_id))?;

        info!("Stopped Krawl Mode session {}", session.id);
        self.view_with_total(session, total).await
    }

    pub async fn get_session(&self, krawl_id: &str, user_id: Option<&str>) -> Result<SessionView> {
        let user_id = require_user(user_id)?;
        let session = self.require_active(krawl_id, user_id).await?;
        self.to_session_view(session).await
    }

    /// Overwrites the client-reported distance. Last write wins; monotonicity
    /// is not checked.
    pub async fn update_progress(
        &self,
        krawl_id: &str,
        user_id: Option<&str>,
        total_distance_meters: Option<f64>,
    ) -> Result<SessionView> {
        let user_id = require_user(user_id)?;
        require_non_negative(total_distance_meters, "totalDistanceMeters")?;
        debug!("Updating progress for krawl {krawl_id}, user {user_id}");

        let total = self.ordered_gems(krawl_id).await?.len();
        let session = self
            .db
            .update_active_session_distance(krawl_id, user_id, total_distance_meters, Utc::now())
            .await?
            .ok_or_else(|| active_session_not_found(krawl_id, user_id))?;

        self.view_with_total(session, total).await
    }

    /// Marks a gem as reached. Re-completing a gem is a silent no-op, and
    /// covering every gem of the krawl completes the session.
    pub async fn complete_gem(
        &self,
        krawl_id: &str,
        user_id: Option<&str>,
        gem_id: &str,
        distance_to_gem_meters: Option<f64>,
        arrival_method: ArrivalMethod,
    ) -> Result<ProgressView> {
        let user_id = require_user(user_id)?;
        require_non_negative(distance_to_gem_meters, "distanceToGemMeters")?;
        debug!("Completing gem {gem_id} for krawl {krawl_id}, user {user_id}");

        let Some(session) = self.db.find_active_session(krawl_id, user_id).await? else {
            return self.replay_final_completion(krawl_id, user_id, gem_id).await;
        };

        let gems = self.ordered_gems(krawl_id).await?;
        if !gems.iter().any(|id| id == gem_id) {
            return Err(KrawlModeError::not_found(
                "Gem",
                format!("{gem_id} in krawl {krawl_id}"),
            ));
        }

        let Some(outcome) = self
            .db
            .record_gem_completion(
                &session.id,
                gem_id,
                distance_to_gem_meters,
                arrival_method,
                gems.len(),
                Utc::now(),
            )
            .await?
        else {
            // Session ended between lookup and write.
            return self.replay_final_completion(krawl_id, user_id, gem_id).await;
        };

        if outcome.newly_recorded {
            info!("Marked gem {gem_id} as completed in session {}", session.id);
        } else {
            debug!("Gem {gem_id} already completed in session {}", session.id);
        }
        if outcome.session.status == SessionStatus::Completed {
            info!(
                "All gems completed, session {} marked as completed",
                outcome.session.id
            );
        }

        Ok(build_snapshot(
            &outcome.session.id,
            &gems,
            outcome.completed_gem_ids,
        ))
    }

    pub async fn get_progress(&self, krawl_id: &str, user_id: Option<&str>) -> Result<ProgressView> {
        let user_id = require_user(user_id)?;
        let session = self.require_active(krawl_id, user_id).await?;
        self.snapshot(&session).await
    }

    pub async fn record_location(
        &self,
        session_id: &str,
        sample: NewLocationSample,
    ) -> Result<LocationSample> {
        self.locations.record(session_id, sample).await
    }

    pub async fn location_history(&self, session_id: &str) -> Result<Vec<LocationSample>> {
        self.locations.history(session_id).await
    }

    /// Every session the user has started, newest first.
    pub async fn session_history(&self, user_id: Option<&str>) -> Result<Vec<Session>> {
        let user_id = require_user(user_id)?;
        Ok(self.db.list_user_sessions(user_id).await?)
    }

    /// A retried completion of the gem that finished the krawl must not turn
    /// into an error, so the finished session's snapshot is returned instead.
    async fn replay_final_completion(
        &self,
        krawl_id: &str,
        user_id: &str,
        gem_id: &str,
    ) -> Result<ProgressView> {
        if let Some(latest) = self.db.find_latest_session(krawl_id, user_id).await? {
            if latest.status == SessionStatus::Completed {
                let completed = self.db.completed_gem_ids(&latest.id).await?;
                if completed.iter().any(|id| id == gem_id) {
                    debug!("Replaying completion of gem {gem_id} for finished session {}", latest.id);
                    let gems = self.ordered_gems(krawl_id).await?;
                    return Ok(build_snapshot(&latest.id, &gems, completed));
                }
            }
        }

        Err(active_session_not_found(krawl_id, user_id))
    }

    async fn require_active(&self, krawl_id: &str, user_id: &str) -> Result<Session> {
        self.db
            .find_active_session(krawl_id, user_id)
            .await?
            .ok_or_else(|| active_session_not_found(krawl_id, user_id))
    }

    async fn ordered_gems(&self, krawl_id: &str) -> Result<Vec<String>> {
        self.krawls
            .ordered_gem_ids(krawl_id)
            .await?
            .ok_or_else(|| KrawlModeError::not_found("Krawl", krawl_id))
    }

    async fn snapshot(&self, session: &Session) -> Result<ProgressView> {
        let gems = self.ordered_gems(&session.krawl_id).await?;
        let completed = self.db.completed_gem_ids(&session.id).await?;
        Ok(build_snapshot(&session.id, &gems, completed))
    }

    async fn to_session_view(&self, session: Session) -> Result<SessionView> {
        let total = self.ordered_gems(&session.krawl_id).await?.len();
        self.view_with_total(session, total).await
    }

    async fn view_with_total(&self, session: Session, total: usize) -> Result<SessionView> {
        let completed = self.db.count_completed_gems(&session.id).await?;
        Ok(session_view(session, completed, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::InMemoryDirectory;

    struct Fixture {
        _dir: tempfile::TempDir,
        directory: Arc<InMemoryDirectory>,
        controller: KrawlModeController,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("krawl.sqlite3")).unwrap();
        let directory = Arc::new(InMemoryDirectory::new());
        directory.put_krawl("k1", ["A", "B", "C"]).await;
        directory.put_user("u1").await;
        let controller = KrawlModeController::new(
            db,
            directory.clone(),
            directory.clone(),
            &EngineConfig::default(),
        );
        Fixture {
            _dir: dir,
            directory,
            controller,
        }
    }

    async fn complete(c: &KrawlModeController, gem: &str) -> Result<ProgressView> {
        c.complete_gem("k1", Some("u1"), gem, None, ArrivalMethod::Manual)
            .await
    }

    #[tokio::test]
    async fn start_is_idempotent_for_active_session() {
        let f = fixture().await;
        let first = f.controller.start("k1", Some("u1")).await.unwrap();
        let second = f.controller.start("k1", Some("u1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, SessionStatus::Active);
        assert_eq!(first.total_gems_count, 3);
        assert_eq!(first.completed_gems_count, 0);
        assert!(first.ended_at.is_none());
    }

    #[tokio::test]
    async fn concurrent_starts_yield_one_active_session() {
        let f = fixture().await;
        let mut handles = Vec::new();
        for _ in 0..16 {
            let controller = f.controller.clone();
            handles.push(tokio::spawn(async move {
                controller.start("k1", Some("u1")).await.unwrap().session_id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let history = f.controller.session_history(Some("u1")).await.unwrap();
        assert_eq!(history.iter().filter(|s| s.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn start_validates_krawl_and_user() {
        let f = fixture().await;

        let err = f.controller.start("missing", Some("u1")).await.unwrap_err();
        assert!(err.is_not_found());

        let err = f.controller.start("k1", Some("ghost")).await.unwrap_err();
        assert!(matches!(err, KrawlModeError::Unauthenticated(_)));

        let err = f.controller.start("k1", None).await.unwrap_err();
        assert!(matches!(err, KrawlModeError::Unauthenticated(_)));

        let err = f.controller.start("k1", Some("  ")).await.unwrap_err();
        assert!(matches!(err, KrawlModeError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn stop_abandons_and_second_stop_is_not_found() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();

        let stopped = f.controller.stop("k1", Some("u1")).await.unwrap();
        assert_eq!(stopped.status, SessionStatus::Abandoned);
        assert!(stopped.ended_at.is_some());

        assert!(f.controller.stop("k1", Some("u1")).await.unwrap_err().is_not_found());
        assert!(f
            .controller
            .get_session("k1", Some("u1"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn stop_without_session_is_not_found() {
        let f = fixture().await;
        assert!(f.controller.stop("k1", Some("u1")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn restart_after_stop_creates_new_session() {
        let f = fixture().await;
        let first = f.controller.start("k1", Some("u1")).await.unwrap();
        f.controller.stop("k1", Some("u1")).await.unwrap();
        let second = f.controller.start("k1", Some("u1")).await.unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(second.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn update_progress_overwrites_distance() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();

        let view = f
            .controller
            .update_progress("k1", Some("u1"), Some(850.0))
            .await
            .unwrap();
        assert_eq!(view.total_distance_meters, 850.0);

        let view = f
            .controller
            .update_progress("k1", Some("u1"), Some(300.0))
            .await
            .unwrap();
        assert_eq!(view.total_distance_meters, 300.0);

        let view = f.controller.update_progress("k1", Some("u1"), None).await.unwrap();
        assert_eq!(view.total_distance_meters, 300.0);

        let err = f
            .controller
            .update_progress("k1", Some("u1"), Some(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, KrawlModeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn update_progress_requires_active_session() {
        let f = fixture().await;
        let err = f
            .controller
            .update_progress("k1", Some("u1"), Some(10.0))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn completing_twice_is_invisible() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();

        let first = complete(&f.controller, "B").await.unwrap();
        let second = complete(&f.controller, "B").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.completed_gems_count, 1);
        let session = f.controller.get_session("k1", Some("u1")).await.unwrap();
        let entries = f
            .controller
            .database()
            .list_progress_entries(&session.session_id)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_completions_record_one_entry() {
        let f = fixture().await;
        let session = f.controller.start("k1", Some("u1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = f.controller.clone();
            handles.push(tokio::spawn(async move {
                complete(&controller, "A").await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().completed_gems_count, 1);
        }

        let count = f
            .controller
            .database()
            .count_completed_gems(&session.session_id)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn next_gem_is_first_uncompleted_in_sequence() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();

        let progress = complete(&f.controller, "B").await.unwrap();
        assert_eq!(progress.next_gem_id.as_deref(), Some("A"));
        assert!((progress.progress_percentage - 100.0 / 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn covering_every_gem_completes_session() {
        let f = fixture().await;
        let started = f.controller.start("k1", Some("u1")).await.unwrap();

        complete(&f.controller, "C").await.unwrap();
        let progress = complete(&f.controller, "A").await.unwrap();
        assert_eq!(progress.completed_gems_count, 2);
        assert!(f.controller.get_session("k1", Some("u1")).await.is_ok());

        let done = complete(&f.controller, "B").await.unwrap();
        assert_eq!(done.progress_percentage, 100.0);
        assert!(done.next_gem_id.is_none());

        let session = f
            .controller
            .database()
            .get_session(&started.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.ended_at.is_some());
        assert!(f
            .controller
            .get_progress("k1", Some("u1"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn retried_final_completion_returns_finished_snapshot() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();
        for gem in ["A", "B", "C"] {
            complete(&f.controller, gem).await.unwrap();
        }

        let retry = complete(&f.controller, "C").await.unwrap();
        assert_eq!(retry.completed_gems_count, 3);
        assert_eq!(retry.progress_percentage, 100.0);
    }

    #[tokio::test]
    async fn completion_after_abandon_is_not_found() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();
        complete(&f.controller, "A").await.unwrap();
        f.controller.stop("k1", Some("u1")).await.unwrap();

        assert!(complete(&f.controller, "A").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn gem_outside_krawl_is_not_found() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();

        let err = complete(&f.controller, "Z").await.unwrap_err();
        assert!(matches!(err, KrawlModeError::NotFound { entity: "Gem", .. }));
    }

    #[tokio::test]
    async fn negative_gem_distance_is_rejected() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();

        let err = f
            .controller
            .complete_gem("k1", Some("u1"), "A", Some(-3.0), ArrivalMethod::Automatic)
            .await
            .unwrap_err();
        assert!(matches!(err, KrawlModeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn edited_sequence_moves_denominator() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();
        complete(&f.controller, "A").await.unwrap();

        f.directory.put_krawl("k1", ["A", "B", "C", "D"]).await;
        let progress = f.controller.get_progress("k1", Some("u1")).await.unwrap();
        assert_eq!(progress.total_gems_count, 4);
        assert_eq!(progress.progress_percentage, 25.0);
        assert_eq!(progress.next_gem_id.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn vanished_krawl_leaves_session_untouched() {
        let f = fixture().await;
        let started = f.controller.start("k1", Some("u1")).await.unwrap();
        f.controller
            .update_progress("k1", Some("u1"), Some(120.0))
            .await
            .unwrap();
        f.directory.remove_krawl("k1").await;

        let err = f.controller.stop("k1", Some("u1")).await.unwrap_err();
        assert!(matches!(err, KrawlModeError::NotFound { entity: "Krawl", .. }));
        let err = f
            .controller
            .update_progress("k1", Some("u1"), Some(999.0))
            .await
            .unwrap_err();
        assert!(matches!(err, KrawlModeError::NotFound { entity: "Krawl", .. }));

        let stored = f
            .controller
            .database()
            .get_session(&started.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(stored.ended_at.is_none());
        assert_eq!(stored.total_distance_meters, 120.0);

        f.directory.put_krawl("k1", ["A", "B", "C"]).await;
        let stopped = f.controller.stop("k1", Some("u1")).await.unwrap();
        assert_eq!(stopped.session_id, started.session_id);
        assert_eq!(stopped.status, SessionStatus::Abandoned);
    }

    #[tokio::test]
    async fn session_view_reports_counts() {
        let f = fixture().await;
        f.controller.start("k1", Some("u1")).await.unwrap();
        complete(&f.controller, "A").await.unwrap();

        let view = f.controller.get_session("k1", Some("u1")).await.unwrap();
        assert_eq!(view.krawl_id, "k1");
        assert_eq!(view.user_id, "u1");
        assert_eq!(view.completed_gems_count, 1);
        assert_eq!(view.total_gems_count, 3);
    }
}
