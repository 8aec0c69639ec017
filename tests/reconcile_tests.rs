use std::cell::RefCell;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use workload_tracker::error::{NotifyError, ReconcileError, StoreError};
use workload_tracker::models::{
    LinkedEvent, LogEntry, NewEvent, NewLogEntry, NewTask, OutcomeStatus, TaskStatus,
};
use workload_tracker::notify::{ChangeNotification, Publisher};
use workload_tracker::reconcile::Reconciler;
use workload_tracker::storage::{LinkCompletion, MemoryStore, TripStore, WorkloadStore};

const JAKARTA: chrono_tz::Tz = chrono_tz::Asia::Jakarta;

/// 2025-03-13 10:00 in Jakarta.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 13, 3, 0, 0).unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Records every notification; optionally fails each publish.
#[derive(Default)]
struct RecordingPublisher {
    sent: RefCell<Vec<ChangeNotification>>,
    fail: bool,
}

impl Publisher for RecordingPublisher {
    fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        self.sent.borrow_mut().push(notification.clone());
        if self.fail {
            return Err(NotifyError::WebhookStatus(503));
        }
        Ok(())
    }
}

/// Wraps a MemoryStore and injects failures.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing_tasks: HashSet<u64>,
    vanished_events: HashSet<u64>,
    unreadable_events: HashSet<u64>,
    enumeration_down: bool,
}

impl TripStore for FlakyStore {
    fn ended_trip_events(&self, before: NaiveDate) -> Result<Vec<LinkedEvent>, StoreError> {
        if self.enumeration_down {
            return Err(StoreError::Invalid("connection refused".into()));
        }
        self.inner.ended_trip_events(before)
    }

    fn linked_event(&self, event_id: u64) -> Result<Option<LinkedEvent>, StoreError> {
        if self.vanished_events.contains(&event_id) {
            return Ok(None);
        }
        if self.unreadable_events.contains(&event_id) {
            return Err(StoreError::Invalid("read timed out".into()));
        }
        self.inner.linked_event(event_id)
    }

    fn complete_link(&self, link_id: u64, at: DateTime<Utc>) -> Result<LinkCompletion, StoreError> {
        let link = self
            .inner
            .links()?
            .into_iter()
            .find(|l| l.id == link_id)
            .expect("link exists");
        if self.failing_tasks.contains(&link.task_id) {
            return Err(StoreError::Invalid(format!("write to task {} rejected", link.task_id)));
        }
        self.inner.complete_link(link_id, at)
    }

    fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        self.inner.append_log(entry)
    }

    fn recent_logs(&self, limit: usize, status: Option<OutcomeStatus>) -> Result<Vec<LogEntry>, StoreError> {
        self.inner.recent_logs(limit, status)
    }
}

fn add_trip(store: &MemoryStore, title: &str, start: &str, end: &str, trip: bool) -> u64 {
    store
        .add_event(
            NewEvent {
                title: title.into(),
                is_business_trip: trip,
                start_date: day(start),
                end_date: day(end),
                created_by: "budi".into(),
                participants: vec!["budi".into(), "sari".into()],
            },
            now() - chrono::Duration::days(30),
        )
        .unwrap()
        .id
}

fn add_linked_task(store: &MemoryStore, event_id: u64, name: &str) -> u64 {
    let task = store
        .add_task(
            NewTask {
                name: name.into(),
                owner: "budi".into(),
                project: Some("Perencanaan".into()),
                due_date: None,
            },
            now() - chrono::Duration::days(30),
        )
        .unwrap();
    store.link_task(event_id, task.id).unwrap();
    task.id
}

fn bandung(store: &MemoryStore) -> (u64, Vec<u64>) {
    let event = add_trip(store, "Kunjungan Dinas Bandung", "2025-03-10", "2025-03-12", true);
    let tasks = vec![
        add_linked_task(store, event, "Laporan perjalanan dinas"),
        add_linked_task(store, event, "Pertanggungjawaban SPPD"),
    ];
    (event, tasks)
}

#[test]
fn test_bandung_trip_completes_both_tasks() {
    let store = MemoryStore::new();
    let (event_id, _) = bandung(&store);
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.event_id, event_id);
    assert_eq!(outcome.title, "Kunjungan Dinas Bandung");
    assert_eq!(outcome.tasks_completed, 2);
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert!(report.notified);

    let doc = store.snapshot();
    assert!(doc.tasks.iter().all(|t| t.status == TaskStatus::Done));
    assert!(doc.tasks.iter().all(|t| t.completed_at == Some(now())));
    assert!(doc.links.iter().all(|l| l.auto_completed && l.auto_completed_at == Some(now())));
    assert_eq!(doc.log.len(), 1);
    assert_eq!(doc.log[0].tasks_completed, 2);
}

#[test]
fn test_second_run_is_a_logged_no_op() {
    let store = MemoryStore::new();
    bandung(&store);
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    reconciler.run_at(now()).unwrap();
    let later = now() + chrono::Duration::days(1);
    let report = reconciler.run_at(later).unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].tasks_completed, 0);
    assert_eq!(report.outcomes[0].links_caught_up, 0);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);

    // Nothing changed, so only the first run was broadcast.
    assert!(!report.notified);
    assert_eq!(publisher.sent.borrow().len(), 1);

    let doc = store.snapshot();
    assert_eq!(doc.log.len(), 2);
    assert_eq!(doc.log[1].tasks_completed, 0);
    // First completion timestamps are untouched.
    assert!(doc.links.iter().all(|l| l.auto_completed_at == Some(now())));
}

#[test]
fn test_trip_ending_today_or_later_is_never_touched() {
    let store = MemoryStore::new();
    let today = add_trip(&store, "Rakor Provinsi", "2025-03-11", "2025-03-13", true);
    let future = add_trip(&store, "Bimtek Jakarta", "2025-03-14", "2025-03-16", true);
    add_linked_task(&store, today, "Bahan paparan");
    add_linked_task(&store, future, "Daftar hadir");
    let before = store.snapshot();

    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);
    for _ in 0..3 {
        let report = reconciler.run_at(now()).unwrap();
        assert!(report.outcomes.is_empty());
        assert!(!report.notified);
    }

    assert_eq!(store.snapshot(), before);
    assert!(publisher.sent.borrow().is_empty());
}

#[test]
fn test_today_follows_office_timezone() {
    let store = MemoryStore::new();
    bandung(&store);
    let publisher = RecordingPublisher::default();
    // 2025-03-12 18:30 UTC is already 2025-03-13 01:30 in Jakarta.
    let late_evening_utc = Utc.with_ymd_and_hms(2025, 3, 12, 18, 30, 0).unwrap();

    let utc = Reconciler::new(&store, &publisher, chrono_tz::Tz::UTC);
    assert!(utc.preview_at(late_evening_utc).unwrap().is_empty());

    let jakarta = Reconciler::new(&store, &publisher, JAKARTA);
    assert_eq!(jakarta.preview_at(late_evening_utc).unwrap().len(), 1);
}

#[test]
fn test_regular_events_are_ignored() {
    let store = MemoryStore::new();
    let meeting = add_trip(&store, "Rapat Pimpinan", "2025-03-03", "2025-03-03", false);
    add_linked_task(&store, meeting, "Notulen rapat");
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    assert!(report.outcomes.is_empty());
    assert_eq!(store.snapshot().tasks[0].status, TaskStatus::Pending);
}

#[test]
fn test_one_failed_write_makes_event_partial() {
    let inner = MemoryStore::new();
    let event = add_trip(&inner, "Verifikasi Lapangan Garut", "2025-03-03", "2025-03-05", true);
    let t1 = add_linked_task(&inner, event, "Berita acara");
    let t2 = add_linked_task(&inner, event, "Dokumentasi");
    let t3 = add_linked_task(&inner, event, "Laporan hasil");
    let mut store = FlakyStore {
        inner,
        failing_tasks: HashSet::from([t2]),
        ..Default::default()
    };

    let publisher = RecordingPublisher::default();
    {
        let reconciler = Reconciler::new(&store, &publisher, JAKARTA);
        let report = reconciler.run_at(now()).unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(outcome.tasks_completed, 2);
        assert_eq!(outcome.failures, 1);
        assert!(outcome
            .error_detail
            .as_deref()
            .is_some_and(|d| d.contains(&format!("task {}", t2))));
    }

    let doc = store.inner.snapshot();
    let status_of = |id: u64| doc.tasks.iter().find(|t| t.id == id).unwrap().status;
    assert_eq!(status_of(t1), TaskStatus::Done);
    assert_eq!(status_of(t2), TaskStatus::Pending);
    assert_eq!(status_of(t3), TaskStatus::Done);
    // No link is flagged while its task stays open.
    let failed_link = doc.links.iter().find(|l| l.task_id == t2).unwrap();
    assert!(!failed_link.auto_completed);
    assert!(failed_link.auto_completed_at.is_none());
    assert_eq!(doc.log[0].status, OutcomeStatus::Partial);

    // The next scheduled run picks up what failed.
    store.failing_tasks.clear();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);
    let report = reconciler.run_at(now() + chrono::Duration::days(1)).unwrap();
    assert_eq!(report.outcomes[0].tasks_completed, 1);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
}

#[test]
fn test_all_writes_failing_marks_event_failed() {
    let inner = MemoryStore::new();
    let event = add_trip(&inner, "Studi Banding Yogyakarta", "2025-03-03", "2025-03-05", true);
    let t1 = add_linked_task(&inner, event, "Laporan");
    let store = FlakyStore {
        inner,
        failing_tasks: HashSet::from([t1]),
        ..Default::default()
    };
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
    assert_eq!(report.outcomes[0].tasks_completed, 0);
    assert!(!report.notified);
    assert!(publisher.sent.borrow().is_empty());
    let history = reconciler.history(10, Some(OutcomeStatus::Failed)).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].error_detail.is_some());
}

#[test]
fn test_failure_on_one_event_does_not_stop_others() {
    let inner = MemoryStore::new();
    let broken = add_trip(&inner, "Dinas Medan", "2025-03-01", "2025-03-02", true);
    let healthy = add_trip(&inner, "Dinas Makassar", "2025-03-03", "2025-03-04", true);
    add_linked_task(&inner, broken, "Laporan Medan");
    add_linked_task(&inner, healthy, "Laporan Makassar");
    let store = FlakyStore {
        inner,
        unreadable_events: HashSet::from([broken]),
        ..Default::default()
    };
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].event_id, broken);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Failed);
    assert_eq!(report.outcomes[1].event_id, healthy);
    assert_eq!(report.outcomes[1].status, OutcomeStatus::Success);
    assert_eq!(store.inner.snapshot().log.len(), 2);
}

#[test]
fn test_event_deleted_mid_run_is_skipped() {
    let inner = MemoryStore::new();
    let gone = add_trip(&inner, "Dinas Batal", "2025-03-01", "2025-03-02", true);
    add_linked_task(&inner, gone, "Laporan");
    let store = FlakyStore {
        inner,
        vanished_events: HashSet::from([gone]),
        ..Default::default()
    };
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    assert!(report.outcomes.is_empty());
    assert!(store.inner.snapshot().log.is_empty());
}

#[test]
fn test_already_done_task_is_caught_up() {
    let store = MemoryStore::new();
    let (_, tasks) = bandung(&store);
    let done_at = now() - chrono::Duration::days(2);
    store.set_task_status(tasks[0], TaskStatus::Done, done_at).unwrap();
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.tasks_completed, 1);
    assert_eq!(outcome.links_caught_up, 1);
    assert_eq!(outcome.status, OutcomeStatus::Success);
    let doc = store.snapshot();
    assert_eq!(doc.tasks[0].completed_at, Some(done_at));
    assert!(doc.links.iter().all(|l| l.auto_completed));
}

#[test]
fn test_preview_is_pure() {
    let store = MemoryStore::new();
    let (event_id, tasks) = bandung(&store);
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);
    let before = store.snapshot();

    let candidates = reconciler.preview_at(now()).unwrap();

    assert_eq!(store.snapshot(), before);
    assert!(publisher.sent.borrow().is_empty());
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].event_id, event_id);
    assert_eq!(
        candidates[0].pending.iter().map(|p| p.task_id).collect::<Vec<_>>(),
        tasks
    );
    assert!(candidates[0].pending.iter().all(|p| p.status == TaskStatus::Pending));
}

#[test]
fn test_preview_skips_fully_completed_trips() {
    let store = MemoryStore::new();
    bandung(&store);
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);
    reconciler.run_at(now()).unwrap();

    assert!(reconciler.preview_at(now()).unwrap().is_empty());
}

#[test]
fn test_enumeration_failure_aborts_before_writes() {
    let inner = MemoryStore::new();
    bandung(&inner);
    let store = FlakyStore {
        inner,
        enumeration_down: true,
        ..Default::default()
    };
    let before = store.inner.snapshot();
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let result = reconciler.run_at(now());

    assert!(matches!(result, Err(ReconcileError::StoreUnavailable(_))));
    assert!(matches!(reconciler.preview_at(now()), Err(ReconcileError::StoreUnavailable(_))));
    assert_eq!(store.inner.snapshot(), before);
    assert!(publisher.sent.borrow().is_empty());
}

#[test]
fn test_single_aggregate_notification_per_run() {
    let store = MemoryStore::new();
    bandung(&store);
    let second = add_trip(&store, "Dinas Semarang", "2025-03-04", "2025-03-06", true);
    add_linked_task(&store, second, "Laporan Semarang");
    let publisher = RecordingPublisher::default();
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    let sent = publisher.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].outcomes, report.outcomes);
    assert_eq!(sent[0].outcomes.len(), 2);
    assert_eq!(sent[0].executed_at, now());
}

#[test]
fn test_notification_failure_does_not_change_outcome() {
    let store = MemoryStore::new();
    bandung(&store);
    let publisher = RecordingPublisher {
        fail: true,
        ..Default::default()
    };
    let reconciler = Reconciler::new(&store, &publisher, JAKARTA);

    let report = reconciler.run_at(now()).unwrap();

    assert!(!report.notified);
    assert_eq!(report.outcomes[0].status, OutcomeStatus::Success);
    assert_eq!(report.tasks_completed(), 2);
    assert_eq!(store.snapshot().log.len(), 1);
}
