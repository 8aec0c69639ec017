use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::LinkCompletion;
use crate::error::StoreError;
use crate::models::{
    Event, LinkedEvent, LinkedTask, LogEntry, NewEvent, NewLogEntry, NewTask, OutcomeStatus,
    Task, TaskLink, TaskStatus,
};

/// Every record of the workload tracker in one serializable value.
///
/// Backs both the JSON file store and the in-memory store. A single
/// `complete_link` call touches one task and one link of the same document,
/// so persisting the document once makes the pair atomic.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Document {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub links: Vec<TaskLink>,
    #[serde(default)]
    pub log: Vec<LogEntry>,
    /// Highest id ever handed out per record kind. Ids of deleted records
    /// are never reused.
    #[serde(default)]
    pub last_ids: LastIds,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastIds {
    #[serde(default)]
    pub task: u64,
    #[serde(default)]
    pub event: u64,
    #[serde(default)]
    pub link: u64,
    #[serde(default)]
    pub log: u64,
}

/// Next id after both the counter and every id still present, so documents
/// written before the counters existed keep allocating above their records.
fn next_id(last: &mut u64, ids: impl Iterator<Item = u64>) -> u64 {
    let id = ids.fold(*last, u64::max) + 1;
    *last = id;
    id
}

impl Document {
    pub fn ended_trip_events(&self, before: NaiveDate) -> Vec<LinkedEvent> {
        let mut events: Vec<&Event> = self
            .events
            .iter()
            .filter(|e| e.is_business_trip && e.end_date < before)
            .filter(|e| self.links.iter().any(|l| l.event_id == e.id))
            .collect();
        events.sort_by_key(|e| (e.end_date, e.id));
        events.into_iter().map(|e| self.resolve(e)).collect()
    }

    pub fn linked_event(&self, event_id: u64) -> Option<LinkedEvent> {
        self.events
            .iter()
            .find(|e| e.id == event_id)
            .map(|e| self.resolve(e))
    }

    fn resolve(&self, event: &Event) -> LinkedEvent {
        let links = self
            .links
            .iter()
            .filter(|l| l.event_id == event.id)
            .filter_map(|l| {
                self.tasks.iter().find(|t| t.id == l.task_id).map(|t| LinkedTask {
                    link: l.clone(),
                    task: t.clone(),
                })
            })
            .collect();
        LinkedEvent {
            event: event.clone(),
            links,
        }
    }

    pub fn complete_link(
        &mut self,
        link_id: u64,
        at: DateTime<Utc>,
    ) -> Result<LinkCompletion, StoreError> {
        let link_idx = self
            .links
            .iter()
            .position(|l| l.id == link_id)
            .ok_or(StoreError::NotFound { kind: "link", id: link_id })?;
        if self.links[link_idx].auto_completed {
            return Ok(LinkCompletion::AlreadyCompleted);
        }
        let task_id = self.links[link_idx].task_id;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(StoreError::NotFound { kind: "task", id: task_id })?;

        let outcome = if task.status == TaskStatus::Done {
            LinkCompletion::CaughtUp
        } else {
            task.status = TaskStatus::Done;
            task.completed_at.get_or_insert(at);
            LinkCompletion::Completed
        };

        let link = &mut self.links[link_idx];
        link.auto_completed = true;
        link.auto_completed_at = Some(at);
        Ok(outcome)
    }

    pub fn append_log(&mut self, entry: NewLogEntry) -> LogEntry {
        let row = LogEntry {
            id: next_id(&mut self.last_ids.log, self.log.iter().map(|l| l.id)),
            executed_at: entry.executed_at,
            event_id: entry.event_id,
            event_title: entry.event_title,
            tasks_completed: entry.tasks_completed,
            status: entry.status,
            error_detail: entry.error_detail,
        };
        self.log.push(row.clone());
        row
    }

    pub fn recent_logs(&self, limit: usize, status: Option<OutcomeStatus>) -> Vec<LogEntry> {
        let mut rows: Vec<LogEntry> = self
            .log
            .iter()
            .filter(|l| status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        rows
    }

    pub fn add_task(&mut self, task: NewTask, at: DateTime<Utc>) -> Task {
        let t = Task {
            id: next_id(&mut self.last_ids.task, self.tasks.iter().map(|t| t.id)),
            name: task.name,
            owner: task.owner,
            project: task.project,
            due_date: task.due_date,
            status: TaskStatus::Pending,
            created_at: at,
            completed_at: None,
        };
        self.tasks.push(t.clone());
        t
    }

    pub fn set_task_status(
        &mut self,
        task_id: u64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(StoreError::NotFound { kind: "task", id: task_id })?;
        task.status = status;
        if status == TaskStatus::Done {
            task.completed_at.get_or_insert(at);
        } else {
            task.completed_at = None;
        }
        Ok(task.clone())
    }

    pub fn add_event(&mut self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError> {
        validate_window(&event)?;
        let e = Event {
            id: next_id(&mut self.last_ids.event, self.events.iter().map(|e| e.id)),
            title: event.title,
            is_business_trip: event.is_business_trip,
            start_date: event.start_date,
            end_date: event.end_date,
            created_by: event.created_by,
            participants: dedup(event.participants),
            created_at: at,
        };
        self.events.push(e.clone());
        Ok(e)
    }

    pub fn remove_event(&mut self, event_id: u64) -> Result<(), StoreError> {
        let len_before = self.events.len();
        self.events.retain(|e| e.id != event_id);
        if self.events.len() == len_before {
            return Err(StoreError::NotFound { kind: "event", id: event_id });
        }
        self.links.retain(|l| l.event_id != event_id);
        Ok(())
    }

    pub fn link_task(&mut self, event_id: u64, task_id: u64) -> Result<TaskLink, StoreError> {
        if !self.events.iter().any(|e| e.id == event_id) {
            return Err(StoreError::NotFound { kind: "event", id: event_id });
        }
        if !self.tasks.iter().any(|t| t.id == task_id) {
            return Err(StoreError::NotFound { kind: "task", id: task_id });
        }
        if self
            .links
            .iter()
            .any(|l| l.event_id == event_id && l.task_id == task_id)
        {
            return Err(StoreError::Invalid(format!(
                "task {} is already linked to event {}",
                task_id, event_id
            )));
        }
        let link = TaskLink {
            id: next_id(&mut self.last_ids.link, self.links.iter().map(|l| l.id)),
            event_id,
            task_id,
            auto_completed: false,
            auto_completed_at: None,
        };
        self.links.push(link.clone());
        Ok(link)
    }
}

pub(crate) fn validate_window(event: &NewEvent) -> Result<(), StoreError> {
    if event.end_date < event.start_date {
        return Err(StoreError::Invalid(format!(
            "event '{}' ends ({}) before it starts ({})",
            event.title, event.end_date, event.start_date
        )));
    }
    Ok(())
}

pub(crate) fn dedup(mut participants: Vec<String>) -> Vec<String> {
    participants.sort();
    participants.dedup();
    participants
}
