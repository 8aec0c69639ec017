use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use workload_tracker::models::{NewEvent, NewTask, OutcomeStatus, TaskStatus};
use workload_tracker::notify::LogPublisher;
use workload_tracker::reconcile::{Reconciler, RunReport};
use workload_tracker::storage::{SqliteStore, TripStore, WorkloadStore};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 13, 3, 0, 0).unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn seed(path: &Path, tasks: usize) -> u64 {
    let store = SqliteStore::open(path).unwrap();
    let event = store
        .add_event(
            NewEvent {
                title: "Kunjungan Dinas Bandung".into(),
                is_business_trip: true,
                start_date: day("2025-03-10"),
                end_date: day("2025-03-12"),
                created_by: "budi".into(),
                participants: vec!["budi".into()],
            },
            now(),
        )
        .unwrap();
    for i in 0..tasks {
        let task = store
            .add_task(
                NewTask {
                    name: format!("Tugas {}", i + 1),
                    owner: "budi".into(),
                    project: None,
                    due_date: None,
                },
                now(),
            )
            .unwrap();
        store.link_task(event.id, task.id).unwrap();
    }
    event.id
}

fn run_once(path: &Path, at: DateTime<Utc>) -> RunReport {
    let store = SqliteStore::open(path).unwrap();
    let publisher = LogPublisher;
    Reconciler::new(&store, &publisher, chrono_tz::Asia::Jakarta)
        .run_at(at)
        .unwrap()
}

#[test]
fn test_scenario_on_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("workload.db");
    let event_id = seed(&path, 2);

    let first = run_once(&path, now());
    assert_eq!(first.outcomes[0].tasks_completed, 2);
    assert_eq!(first.outcomes[0].status, OutcomeStatus::Success);

    let second = run_once(&path, now() + chrono::Duration::hours(24));
    assert_eq!(second.outcomes[0].tasks_completed, 0);
    assert_eq!(second.outcomes[0].status, OutcomeStatus::Success);

    let store = SqliteStore::open(&path).unwrap();
    let linked = store.linked_event(event_id).unwrap().unwrap();
    for l in &linked.links {
        assert_eq!(l.task.status, TaskStatus::Done);
        assert_eq!(l.link.auto_completed_at, Some(now()));
    }
    let history = store.recent_logs(10, None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].tasks_completed, 0);
    assert_eq!(history[1].tasks_completed, 2);
}

#[test]
fn test_overlapping_runs_complete_each_task_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("workload.db");
    let event_id = seed(&path, 5);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            thread::spawn(move || {
                let store = SqliteStore::open(&path).unwrap();
                let publisher = LogPublisher;
                let reconciler = Reconciler::new(&store, &publisher, chrono_tz::Asia::Jakarta);
                barrier.wait();
                reconciler
                    .run_at(now() + chrono::Duration::seconds(i))
                    .unwrap()
            })
        })
        .collect();
    let reports: Vec<RunReport> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let total: usize = reports.iter().map(|r| r.tasks_completed()).sum();
    assert_eq!(total, 5);
    assert!(reports
        .iter()
        .all(|r| r.outcomes.iter().all(|o| o.status == OutcomeStatus::Success)));

    let store = SqliteStore::open(&path).unwrap();
    let linked = store.linked_event(event_id).unwrap().unwrap();
    for l in &linked.links {
        assert!(l.link.auto_completed);
        assert_eq!(l.task.status, TaskStatus::Done);
        // Task and link were written by the same run.
        assert_eq!(l.task.completed_at, l.link.auto_completed_at);
    }
    // One audit row per run per event.
    assert_eq!(store.recent_logs(10, None).unwrap().len(), 2);
}

#[test]
fn test_preview_leaves_database_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("workload.db");
    let event_id = seed(&path, 2);

    let store = SqliteStore::open(&path).unwrap();
    let before = store.linked_event(event_id).unwrap();
    let publisher = LogPublisher;
    let candidates = Reconciler::new(&store, &publisher, chrono_tz::Asia::Jakarta)
        .preview_at(now())
        .unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].pending.len(), 2);
    assert_eq!(store.linked_event(event_id).unwrap(), before);
    assert!(store.recent_logs(10, None).unwrap().is_empty());
}
