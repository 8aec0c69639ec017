//! Runtime configuration

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::storage::{db_path, Backend};

pub const DEFAULT_TIMEZONE: &str = "Asia/Jakarta";
/// Daily at 01:00 office time.
pub const DEFAULT_SCHEDULE: &str = "0 1 * * *";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Database file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// IANA zone deciding which calendar day "today" is
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Five-field cron expression for the `schedule` loop
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// When set, triggers must present `Authorization: Bearer <token>`
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            schedule: default_schedule(),
            token: None,
        }
    }
}

fn default_timezone() -> String { DEFAULT_TIMEZONE.to_string() }
fn default_schedule() -> String { DEFAULT_SCHEDULE.to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// JSON-lines file receiving one line per run
    #[serde(default)]
    pub outbox: Option<PathBuf>,

    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub webhook_token: Option<String>,
}

impl Config {
    /// Loads configuration.
    ///
    /// An explicit path must exist. Without one, the platform config file is
    /// used when present, otherwise defaults. Environment overrides
    /// (`WORKLOAD_DB`, `RECONCILE_TOKEN`) are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(db) = std::env::var("WORKLOAD_DB") {
            if !db.is_empty() {
                self.storage.path = Some(PathBuf::from(db));
            }
        }
        if let Ok(token) = std::env::var("RECONCILE_TOKEN") {
            self.reconcile.token = Some(token);
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| db_path(self.storage.backend))
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.reconcile
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.reconcile.timezone.clone()))
    }

    /// The configured bearer token; an empty string counts as unset.
    pub fn expected_token(&self) -> Option<&str> {
        self.reconcile.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// `~/.config/workload-tracker/config.toml` on Linux.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("workload-tracker").join("config.toml"))
}
