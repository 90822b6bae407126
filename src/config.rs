use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Duration;
use log::warn;
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "KRAWL_MODE_CONFIG";
pub const DATABASE_PATH_ENV: &str = "KRAWL_MODE_DB";

const DEFAULT_CONFIG_FILE: &str = "krawl-mode.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: PathBuf,
    /// Raw location trails are privacy sensitive; recording can be switched off.
    pub location_history_enabled: bool,
    pub location_retention_days: u32,
    /// ACTIVE sessions idle longer than this are abandoned by maintenance.
    pub stale_session_hours: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("krawl-mode.sqlite3"),
            location_history_enabled: true,
            location_retention_days: 30,
            stale_session_hours: 24,
        }
    }
}

impl EngineConfig {
    /// Reads the config file if present, falling back to defaults, then
    /// applies environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed config {}: {err}", path.display());
                EngineConfig::default()
            })
        } else {
            EngineConfig::default()
        };

        if let Ok(db_path) = std::env::var(DATABASE_PATH_ENV) {
            if !db_path.trim().is_empty() {
                config.database_path = PathBuf::from(db_path);
            }
        }

        Ok(config)
    }

    /// Config file named by `KRAWL_MODE_CONFIG`, or `krawl-mode.json`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load(&path)
    }

    pub fn location_retention(&self) -> Duration {
        Duration::days(i64::from(self.location_retention_days))
    }

    pub fn stale_session_after(&self) -> Duration {
        Duration::hours(i64::from(self.stale_session_hours))
    }
}
