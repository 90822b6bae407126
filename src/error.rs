//! Error types surfaced by Krawl Mode operations.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KrawlModeError {
    /// Krawl, user-visible active session, or gem-in-krawl does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Caller identity is absent or does not resolve to a user.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation needs a session in a different state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// SQLite or lookup failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl KrawlModeError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T, E = KrawlModeError> = std::result::Result<T, E>;
