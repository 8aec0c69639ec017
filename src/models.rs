use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Workflow state of a task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in-progress" | "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(format!(
                "unknown task status '{}'. Supported: pending, in-progress, done",
                other
            )),
        }
    }
}

/// A unit of workload assigned to an employee.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique identifier for the task.
    pub id: u64,
    /// The name or description of the task.
    pub name: String,
    /// Employee the task is assigned to.
    pub owner: String,
    /// Optional project or work unit the task belongs to.
    #[serde(default)]
    pub project: Option<String>,
    /// Optional due date.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the task first reaches `done`.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub owner: String,
    pub project: Option<String>,
    pub due_date: Option<NaiveDate>,
}

/// A calendar event. Business trips are events with `is_business_trip` set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub is_business_trip: bool,
    /// First day of the event (inclusive).
    pub start_date: NaiveDate,
    /// Last day of the event (inclusive).
    pub end_date: NaiveDate,
    /// Employee who created the event.
    pub created_by: String,
    #[serde(default)]
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// True once the whole event window lies before `today`.
    ///
    /// `end_date` is inclusive, so an event ending today has not elapsed.
    pub fn has_ended(&self, today: NaiveDate) -> bool {
        self.end_date < today
    }

    /// Whether the reconciler may touch this event's links on `today`.
    pub fn qualifies_for_auto_completion(&self, today: NaiveDate) -> bool {
        self.is_business_trip && self.has_ended(today)
    }
}

/// Fields supplied when creating an event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub is_business_trip: bool,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_by: String,
    pub participants: Vec<String>,
}

/// Association between one event and one task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TaskLink {
    pub id: u64,
    pub event_id: u64,
    pub task_id: u64,
    #[serde(default)]
    pub auto_completed: bool,
    /// Set exactly once, when `auto_completed` flips to true.
    #[serde(default)]
    pub auto_completed_at: Option<DateTime<Utc>>,
}

/// A link together with the current state of its task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LinkedTask {
    pub link: TaskLink,
    pub task: Task,
}

/// An event with all of its links resolved.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LinkedEvent {
    pub event: Event,
    pub links: Vec<LinkedTask>,
}

impl LinkedEvent {
    pub fn pending_links(&self) -> impl Iterator<Item = &LinkedTask> {
        self.links.iter().filter(|l| !l.link.auto_completed)
    }

    pub fn has_pending_links(&self) -> bool {
        self.pending_links().next().is_some()
    }
}

/// Result classification for one event within a reconciliation run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Partial,
    Failed,
}

impl OutcomeStatus {
    /// `success` with no failures, `partial` with a mix, `failed` when every
    /// attempt failed.
    pub fn classify(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (_, 0) => OutcomeStatus::Success,
            (0, _) => OutcomeStatus::Failed,
            _ => OutcomeStatus::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(OutcomeStatus::Success),
            "partial" => Ok(OutcomeStatus::Partial),
            "failed" => Ok(OutcomeStatus::Failed),
            other => Err(format!(
                "unknown outcome status '{}'. Supported: success, partial, failed",
                other
            )),
        }
    }
}

/// One row of the auto-completion audit log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: u64,
    pub executed_at: DateTime<Utc>,
    pub event_id: u64,
    pub event_title: String,
    pub tasks_completed: usize,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub error_detail: Option<String>,
}

/// Fields supplied when appending to the audit log.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub executed_at: DateTime<Utc>,
    pub event_id: u64,
    pub event_title: String,
    pub tasks_completed: usize,
    pub status: OutcomeStatus,
    pub error_detail: Option<String>,
}
