//! Storage seams for the workload tracker.
//!
//! [`TripStore`] is everything the reconciler needs: the ended-trip query,
//! the atomic link completion and the audit log. [`WorkloadStore`] covers the
//! plain record keeping the CLI uses to maintain tasks and events.

mod document;
mod json;
mod memory;
mod sqlite;

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::models::{
    Event, LinkedEvent, LogEntry, NewEvent, NewLogEntry, NewTask, OutcomeStatus, Task,
    TaskLink, TaskStatus,
};

pub use document::{Document, LastIds};
pub use json::JsonStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// What `complete_link` actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCompletion {
    /// The task was moved to `done` and the link flagged.
    Completed,
    /// The task was already `done`; only the link was flagged.
    CaughtUp,
    /// The link had already been flagged (e.g. by an overlapping run).
    AlreadyCompleted,
}

pub trait TripStore {
    /// Business-trip events with `end_date < before` that have at least one link.
    fn ended_trip_events(&self, before: NaiveDate) -> Result<Vec<LinkedEvent>, StoreError>;

    /// A single event with its links, or `None` if it no longer exists.
    fn linked_event(&self, event_id: u64) -> Result<Option<LinkedEvent>, StoreError>;

    /// Flag a link as auto-completed at `at`, moving its task to `done` in the
    /// same atomic write when needed. Re-checks link and task state first.
    fn complete_link(&self, link_id: u64, at: DateTime<Utc>)
        -> Result<LinkCompletion, StoreError>;

    /// Append one audit row. Rows are never updated afterwards.
    fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError>;

    /// Newest first, at most `limit` rows, optionally only one outcome status.
    fn recent_logs(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
    ) -> Result<Vec<LogEntry>, StoreError>;
}

pub trait WorkloadStore {
    fn add_task(&self, task: NewTask, at: DateTime<Utc>) -> Result<Task, StoreError>;
    fn tasks(&self) -> Result<Vec<Task>, StoreError>;
    fn set_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<Task, StoreError>;

    fn add_event(&self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError>;
    fn events(&self) -> Result<Vec<Event>, StoreError>;
    /// Deletes the event and every link that points at it.
    fn remove_event(&self, event_id: u64) -> Result<(), StoreError>;

    fn link_task(&self, event_id: u64, task_id: u64) -> Result<TaskLink, StoreError>;
    fn links(&self) -> Result<Vec<TaskLink>, StoreError>;
}

/// A backend usable by both the reconciler and the CLI.
pub trait Store: TripStore + WorkloadStore {}

impl<T: TripStore + WorkloadStore> Store for T {}

/// Which backend holds the records.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Json,
}

impl Backend {
    fn file_name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "workload.db",
            Backend::Json => "workload.json",
        }
    }
}

/// Returns the path to the database file.
///
/// The path is determined in the following order:
/// 1. `WORKLOAD_DB` environment variable.
/// 2. `~/.local/share/workload-tracker/workload.{db,json}` (on Linux).
/// 3. `./workload.{db,json}` (fallback).
pub fn db_path(backend: Backend) -> PathBuf {
    std::env::var("WORKLOAD_DB").map(PathBuf::from).unwrap_or_else(|_| {
        let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        p.push("workload-tracker");
        p.push(backend.file_name());
        p
    })
}

/// Opens the configured backend at `path`, creating it if needed.
pub fn open_store(backend: Backend, path: &Path) -> Result<Box<dyn Store>, StoreError> {
    Ok(match backend {
        Backend::Sqlite => Box::new(SqliteStore::open(path)?),
        Backend::Json => Box::new(JsonStore::open(path)?),
    })
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))
        }
        _ => Ok(()),
    }
}
