//! Optional raw location trail.
//!
//! Recording never feeds back into progress: distance stays client-reported
//! through `update_progress`.

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::{Database, LocationSample, NewLocationSample},
    error::{KrawlModeError, Result},
    geo::is_valid_coordinate,
    log_info, log_warn,
};

const ENABLE_LOGS: bool = true;

#[derive(Clone)]
pub struct LocationRecorder {
    db: Database,
    enabled: bool,
}

impl LocationRecorder {
    pub fn new(db: Database, enabled: bool) -> Self {
        Self { db, enabled }
    }

    /// Appends a sample to an ACTIVE session's trail.
    pub async fn record(&self, session_id: &str, sample: NewLocationSample) -> Result<LocationSample> {
        if !self.enabled {
            return Err(KrawlModeError::InvalidState(
                "location history is disabled".into(),
            ));
        }

        let session = self.db.get_session(session_id).await?.ok_or_else(|| {
            KrawlModeError::InvalidState(format!("session {session_id} does not exist"))
        })?;
        if session.status.is_terminal() {
            log_warn!("Attempted to store location for inactive session {session_id}");
            return Err(KrawlModeError::InvalidState(format!(
                "session {session_id} is {}",
                session.status.as_str()
            )));
        }

        if !is_valid_coordinate(sample.latitude, sample.longitude) {
            return Err(KrawlModeError::InvalidArgument(format!(
                "coordinates ({}, {}) out of range: latitude must be within [-90, 90] and longitude within [-180, 180]",
                sample.latitude, sample.longitude
            )));
        }

        let record = LocationSample {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            heading: sample.heading,
            speed: sample.speed,
            recorded_at: Utc::now(),
        };

        if !self.db.insert_location_sample_if_active(&record).await? {
            log_warn!("Session {session_id} ended before location could be stored");
            return Err(KrawlModeError::InvalidState(format!(
                "session {session_id} is no longer active"
            )));
        }

        log_info!("Stored location update {} for session {session_id}", record.id);
        Ok(record)
    }

    pub async fn history(&self, session_id: &str) -> Result<Vec<LocationSample>> {
        Ok(self.db.location_history(session_id).await?)
    }
}
