use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use fs2::FileExt;
use tempfile::NamedTempFile;

use super::{ensure_parent_dir, Document, LinkCompletion, TripStore, WorkloadStore};
use crate::error::StoreError;
use crate::models::{
    Event, LinkedEvent, LogEntry, NewEvent, NewLogEntry, NewTask, OutcomeStatus, Task,
    TaskLink, TaskStatus,
};

/// All records in a single pretty-printed JSON file.
///
/// Every access takes an advisory lock on a sidecar `<file>.lock`: shared for
/// reads, exclusive for load + mutate + save. The lock is per open file, so
/// it serializes separate processes, separate `JsonStore` instances and
/// threads alike. Each save writes a fresh temp file in the same directory
/// and renames it over the document.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        ensure_parent_dir(path)?;
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        Ok(Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the sidecar and locks it. Dropping the file releases the lock.
    fn lock(&self, exclusive: bool) -> Result<File, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| StoreError::io(&self.lock_path, e))?;
        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| StoreError::io(&self.lock_path, e))?;
        Ok(file)
    }

    /// Loads the document. A missing file is an empty document.
    fn load(&self) -> Result<Document, StoreError> {
        let mut f = match OpenOptions::new().read(true).open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        let mut s = String::new();
        f.read_to_string(&mut s)
            .map_err(|e| StoreError::io(&self.path, e))?;
        if s.trim().is_empty() {
            return Ok(Document::default());
        }
        Ok(serde_json::from_str(&s)?)
    }

    fn save(&self, doc: &Document) -> Result<(), StoreError> {
        let s = serde_json::to_string_pretty(doc)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(s.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::io(&self.path, e.error))?;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Document) -> T) -> Result<T, StoreError> {
        let _lock = self.lock(false)?;
        let doc = self.load()?;
        Ok(f(&doc))
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Document) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock(true)?;
        let mut doc = self.load()?;
        let value = f(&mut doc)?;
        self.save(&doc)?;
        Ok(value)
    }
}

impl TripStore for JsonStore {
    fn ended_trip_events(&self, before: NaiveDate) -> Result<Vec<LinkedEvent>, StoreError> {
        self.read(|doc| doc.ended_trip_events(before))
    }

    fn linked_event(&self, event_id: u64) -> Result<Option<LinkedEvent>, StoreError> {
        self.read(|doc| doc.linked_event(event_id))
    }

    fn complete_link(
        &self,
        link_id: u64,
        at: DateTime<Utc>,
    ) -> Result<LinkCompletion, StoreError> {
        self.mutate(|doc| doc.complete_link(link_id, at))
    }

    fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        self.mutate(|doc| Ok(doc.append_log(entry)))
    }

    fn recent_logs(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        self.read(|doc| doc.recent_logs(limit, status))
    }
}

impl WorkloadStore for JsonStore {
    fn add_task(&self, task: NewTask, at: DateTime<Utc>) -> Result<Task, StoreError> {
        self.mutate(|doc| Ok(doc.add_task(task, at)))
    }

    fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.read(|doc| doc.tasks.clone())
    }

    fn set_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        self.mutate(|doc| doc.set_task_status(task_id, status, at))
    }

    fn add_event(&self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError> {
        self.mutate(|doc| doc.add_event(event, at))
    }

    fn events(&self) -> Result<Vec<Event>, StoreError> {
        self.read(|doc| doc.events.clone())
    }

    fn remove_event(&self, event_id: u64) -> Result<(), StoreError> {
        self.mutate(|doc| doc.remove_event(event_id))
    }

    fn link_task(&self, event_id: u64, task_id: u64) -> Result<TaskLink, StoreError> {
        self.mutate(|doc| doc.link_task(event_id, task_id))
    }

    fn links(&self) -> Result<Vec<TaskLink>, StoreError> {
        self.read(|doc| doc.links.clone())
    }
}
