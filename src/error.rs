//! Error types for storage, reconciliation, notification and configuration.
//!
//! Only `ReconcileError` ever escapes a reconciliation run. Per-link write
//! failures are absorbed into the per-event tally and notification failures
//! are logged.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed store document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A single link could not be completed. Scoped to that link only.
#[derive(Debug, Error)]
#[error("Failed to complete link {link_id} (task {task_id}): {source}")]
pub struct LinkWriteFailed {
    pub link_id: u64,
    pub task_id: u64,
    #[source]
    pub source: StoreError,
}

/// Errors that abort a whole reconciliation invocation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("Unauthorized: a valid bearer token is required")]
    Unauthorized,
}

/// Publishing a change notification failed. Best effort, never fatal.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification failed: could not write outbox {path}: {source}")]
    Outbox {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Notification failed: webhook request error: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("Notification failed: webhook returned HTTP {0}")]
    WebhookStatus(u16),

    #[error("Notification failed: payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Notification failed for {failed} of {total} channels")]
    Fanout { failed: usize, total: usize },
}

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid timezone: {0}")]
    Timezone(String),

    #[error("Invalid cron expression '{expr}': {reason}")]
    Cron { expr: String, reason: String },
}

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidInput(String),
}
