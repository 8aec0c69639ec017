//! Business-trip auto-completion.
//!
//! Once a business trip's last day has passed, every task linked to it is
//! considered finished. A run walks the ended trips, completes outstanding
//! links one at a time through [`TripStore::complete_link`], writes one audit
//! row per trip and finally publishes a single aggregate notification when
//! any link was flagged.
//!
//! Runs are stateless and may overlap: `complete_link` re-checks each link
//! under the store's write serialization, so a link is completed at most once.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{LinkWriteFailed, ReconcileError};
use crate::models::{LinkedEvent, LogEntry, NewLogEntry, OutcomeStatus, TaskStatus};
use crate::notify::{ChangeNotification, Publisher};
use crate::storage::{LinkCompletion, TripStore};

/// A task that a run would complete.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingTask {
    pub link_id: u64,
    pub task_id: u64,
    pub task_name: String,
    pub owner: String,
    pub status: TaskStatus,
}

/// An ended business trip with at least one outstanding link.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Candidate {
    pub event_id: u64,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub participants: Vec<String>,
    pub pending: Vec<PendingTask>,
}

impl From<&LinkedEvent> for Candidate {
    fn from(linked: &LinkedEvent) -> Self {
        Candidate {
            event_id: linked.event.id,
            title: linked.event.title.clone(),
            start_date: linked.event.start_date,
            end_date: linked.event.end_date,
            participants: linked.event.participants.clone(),
            pending: linked
                .pending_links()
                .map(|l| PendingTask {
                    link_id: l.link.id,
                    task_id: l.task.id,
                    task_name: l.task.name.clone(),
                    owner: l.task.owner.clone(),
                    status: l.task.status,
                })
                .collect(),
        }
    }
}

/// Result of processing one event in a run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub event_id: u64,
    pub title: String,
    /// Tasks this run moved to `done`.
    pub tasks_completed: usize,
    /// Links flagged whose task was already `done`.
    pub links_caught_up: usize,
    pub failures: usize,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl EventOutcome {
    pub fn changed_links(&self) -> bool {
        self.tasks_completed + self.links_caught_up > 0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunReport {
    pub executed_at: DateTime<Utc>,
    pub outcomes: Vec<EventOutcome>,
    /// False when nothing changed, so nothing was published, or publishing failed.
    pub notified: bool,
}

impl RunReport {
    pub fn tasks_completed(&self) -> usize {
        self.outcomes.iter().map(|o| o.tasks_completed).sum()
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

#[derive(Default)]
struct Tally {
    completed: usize,
    caught_up: usize,
    failures: Vec<String>,
}

pub struct Reconciler<'a, S: TripStore + ?Sized> {
    store: &'a S,
    publisher: &'a dyn Publisher,
    timezone: Tz,
}

impl<'a, S: TripStore + ?Sized> Reconciler<'a, S> {
    /// `timezone` decides which calendar day "today" is.
    pub fn new(store: &'a S, publisher: &'a dyn Publisher, timezone: Tz) -> Self {
        Self {
            store,
            publisher,
            timezone,
        }
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    pub fn preview(&self) -> Result<Vec<Candidate>, ReconcileError> {
        self.preview_at(Utc::now())
    }

    /// Read-only listing of what [`run_at`](Self::run_at) would touch.
    pub fn preview_at(&self, now: DateTime<Utc>) -> Result<Vec<Candidate>, ReconcileError> {
        let today = self.today(now);
        let events = self.store.ended_trip_events(today)?;
        Ok(events
            .iter()
            .filter(|e| e.has_pending_links())
            .map(Candidate::from)
            .collect())
    }

    pub fn run(&self) -> Result<RunReport, ReconcileError> {
        self.run_at(Utc::now())
    }

    /// Complete the linked tasks of every ended business trip.
    ///
    /// Fails only when the initial enumeration fails, in which case nothing
    /// has been written. Everything after that is recorded per event.
    pub fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport, ReconcileError> {
        let today = self.today(now);
        let candidates = self.store.ended_trip_events(today).map_err(|e| {
            error!(error = %e, "could not enumerate ended business trips");
            ReconcileError::StoreUnavailable(e)
        })?;
        info!(candidates = candidates.len(), %today, "trip auto-completion run started");

        let outcomes: Vec<EventOutcome> = candidates
            .iter()
            .filter_map(|candidate| self.process_event(candidate, today, now))
            .collect();

        // Clients only hear about runs that flagged at least one link.
        let changed = outcomes.iter().any(EventOutcome::changed_links);
        let notified = changed && self.publish(now, &outcomes);

        let report = RunReport {
            executed_at: now,
            outcomes,
            notified,
        };
        info!(
            events = report.outcomes.len(),
            tasks_completed = report.tasks_completed(),
            partial = report.count(OutcomeStatus::Partial),
            failed = report.count(OutcomeStatus::Failed),
            "trip auto-completion run finished"
        );
        Ok(report)
    }

    pub fn history(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
    ) -> Result<Vec<LogEntry>, ReconcileError> {
        Ok(self.store.recent_logs(limit, status)?)
    }

    fn process_event(
        &self,
        candidate: &LinkedEvent,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<EventOutcome> {
        let event_id = candidate.event.id;
        let current = match self.store.linked_event(event_id) {
            Ok(Some(current)) => current,
            Ok(None) => {
                info!(event_id, "event deleted before processing, skipped");
                return None;
            }
            Err(e) => {
                warn!(event_id, error = %e, "could not re-read event");
                let outcome = EventOutcome {
                    event_id,
                    title: candidate.event.title.clone(),
                    tasks_completed: 0,
                    links_caught_up: 0,
                    failures: 1,
                    status: OutcomeStatus::Failed,
                    error_detail: Some(e.to_string()),
                };
                self.record(&outcome, now);
                return Some(outcome);
            }
        };

        if !current.event.qualifies_for_auto_completion(today) {
            info!(
                event_id,
                end_date = %current.event.end_date,
                business_trip = current.event.is_business_trip,
                "event no longer qualifies, skipped"
            );
            return None;
        }

        let mut tally = Tally::default();
        for linked in current.pending_links() {
            match self.store.complete_link(linked.link.id, now) {
                Ok(LinkCompletion::Completed) => tally.completed += 1,
                Ok(LinkCompletion::CaughtUp) => tally.caught_up += 1,
                Ok(LinkCompletion::AlreadyCompleted) => {
                    debug!(link_id = linked.link.id, "link already completed by another run");
                }
                Err(source) => {
                    let failure = LinkWriteFailed {
                        link_id: linked.link.id,
                        task_id: linked.task.id,
                        source,
                    };
                    warn!(event_id, error = %failure, "link write failed");
                    tally.failures.push(failure.to_string());
                }
            }
        }

        let succeeded = tally.completed + tally.caught_up;
        let outcome = EventOutcome {
            event_id,
            title: current.event.title.clone(),
            tasks_completed: tally.completed,
            links_caught_up: tally.caught_up,
            failures: tally.failures.len(),
            status: OutcomeStatus::classify(succeeded, tally.failures.len()),
            error_detail: (!tally.failures.is_empty()).then(|| tally.failures.join("; ")),
        };
        info!(
            event_id,
            title = %outcome.title,
            tasks_completed = outcome.tasks_completed,
            links_caught_up = outcome.links_caught_up,
            status = %outcome.status,
            "event reconciled"
        );
        self.record(&outcome, now);
        Some(outcome)
    }

    fn record(&self, outcome: &EventOutcome, now: DateTime<Utc>) {
        let entry = NewLogEntry {
            executed_at: now,
            event_id: outcome.event_id,
            event_title: outcome.title.clone(),
            tasks_completed: outcome.tasks_completed,
            status: outcome.status,
            error_detail: outcome.error_detail.clone(),
        };
        if let Err(e) = self.store.append_log(entry) {
            error!(event_id = outcome.event_id, error = %e, "failed to append audit log entry");
        }
    }

    fn publish(&self, now: DateTime<Utc>, outcomes: &[EventOutcome]) -> bool {
        let notification = ChangeNotification::tasks_auto_completed(now, outcomes.to_vec());
        match self.publisher.publish(&notification) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "change notification not delivered");
                false
            }
        }
    }
}
