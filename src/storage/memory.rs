use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use super::{Document, LinkCompletion, TripStore, WorkloadStore};
use crate::error::StoreError;
use crate::models::{
    Event, LinkedEvent, LogEntry, NewEvent, NewLogEntry, NewTask, OutcomeStatus, Task,
    TaskLink, TaskStatus,
};

/// Process-local store. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<Document>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: Document) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    /// A copy of every record, for comparisons in tests.
    pub fn snapshot(&self) -> Document {
        self.doc.lock().clone()
    }
}

impl TripStore for MemoryStore {
    fn ended_trip_events(&self, before: NaiveDate) -> Result<Vec<LinkedEvent>, StoreError> {
        Ok(self.doc.lock().ended_trip_events(before))
    }

    fn linked_event(&self, event_id: u64) -> Result<Option<LinkedEvent>, StoreError> {
        Ok(self.doc.lock().linked_event(event_id))
    }

    fn complete_link(
        &self,
        link_id: u64,
        at: DateTime<Utc>,
    ) -> Result<LinkCompletion, StoreError> {
        self.doc.lock().complete_link(link_id, at)
    }

    fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        Ok(self.doc.lock().append_log(entry))
    }

    fn recent_logs(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.doc.lock().recent_logs(limit, status))
    }
}

impl WorkloadStore for MemoryStore {
    fn add_task(&self, task: NewTask, at: DateTime<Utc>) -> Result<Task, StoreError> {
        Ok(self.doc.lock().add_task(task, at))
    }

    fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.doc.lock().tasks.clone())
    }

    fn set_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        self.doc.lock().set_task_status(task_id, status, at)
    }

    fn add_event(&self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError> {
        self.doc.lock().add_event(event, at)
    }

    fn events(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self.doc.lock().events.clone())
    }

    fn remove_event(&self, event_id: u64) -> Result<(), StoreError> {
        self.doc.lock().remove_event(event_id)
    }

    fn link_task(&self, event_id: u64, task_id: u64) -> Result<TaskLink, StoreError> {
        self.doc.lock().link_task(event_id, task_id)
    }

    fn links(&self) -> Result<Vec<TaskLink>, StoreError> {
        Ok(self.doc.lock().links.clone())
    }
}
