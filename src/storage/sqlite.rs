//! SQLite backend.
//!
//! The default store. `complete_link` runs inside `BEGIN IMMEDIATE`, so
//! overlapping reconciliation runs (threads or processes) serialize on the
//! write lock and each re-reads the link before touching it.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::document::{dedup, validate_window};
use super::{ensure_parent_dir, LinkCompletion, TripStore, WorkloadStore};
use crate::error::StoreError;
use crate::models::{
    Event, LinkedEvent, LinkedTask, LogEntry, NewEvent, NewLogEntry, NewTask, OutcomeStatus,
    Task, TaskLink, TaskStatus,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    owner        TEXT NOT NULL,
    project      TEXT,
    due_date     TEXT,
    status       TEXT NOT NULL DEFAULT 'pending'
                 CHECK (status IN ('pending', 'in-progress', 'done')),
    created_at   TEXT NOT NULL,
    completed_at TEXT
);

CREATE TABLE IF NOT EXISTS events (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    title            TEXT NOT NULL,
    is_business_trip INTEGER NOT NULL DEFAULT 0,
    start_date       TEXT NOT NULL,
    end_date         TEXT NOT NULL,
    created_by       TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    CHECK (end_date >= start_date)
);

CREATE INDEX IF NOT EXISTS idx_events_trip_end ON events (is_business_trip, end_date);

CREATE TABLE IF NOT EXISTS event_participants (
    event_id    INTEGER NOT NULL REFERENCES events (id) ON DELETE CASCADE,
    participant TEXT NOT NULL,
    PRIMARY KEY (event_id, participant)
);

CREATE TABLE IF NOT EXISTS event_tasks (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id          INTEGER NOT NULL REFERENCES events (id) ON DELETE CASCADE,
    task_id           INTEGER NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
    auto_completed    INTEGER NOT NULL DEFAULT 0,
    auto_completed_at TEXT,
    UNIQUE (event_id, task_id)
);

CREATE TABLE IF NOT EXISTS auto_completion_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    executed_at     TEXT NOT NULL,
    event_id        INTEGER NOT NULL,
    event_title     TEXT NOT NULL,
    tasks_completed INTEGER NOT NULL,
    status          TEXT NOT NULL CHECK (status IN ('success', 'partial', 'failed')),
    error_detail    TEXT
);

CREATE INDEX IF NOT EXISTS idx_auto_completion_log_executed
    ON auto_completion_log (executed_at DESC);
"#;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets readers proceed while a run holds the write lock.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    /// Private in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Execute a closure within a write transaction.
    /// Commits on Ok, rolls back on Err.
    fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&self.conn) {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(e) => {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

fn parse_text<T: FromStr<Err = String>>(idx: usize, raw: String) -> rusqlite::Result<T> {
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_idx = row.as_ref().column_index("status")?;
    Ok(Task {
        id: row.get::<_, i64>("id")? as u64,
        name: row.get("name")?,
        owner: row.get("owner")?,
        project: row.get("project")?,
        due_date: row.get("due_date")?,
        status: parse_text(status_idx, row.get("status")?)?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let status_idx = row.as_ref().column_index("status")?;
    Ok(LogEntry {
        id: row.get::<_, i64>("id")? as u64,
        executed_at: row.get("executed_at")?,
        event_id: row.get::<_, i64>("event_id")? as u64,
        event_title: row.get("event_title")?,
        tasks_completed: row.get::<_, i64>("tasks_completed")? as usize,
        status: parse_text(status_idx, row.get("status")?)?,
        error_detail: row.get("error_detail")?,
    })
}

const TASK_COLUMNS: &str = "id, name, owner, project, due_date, status, created_at, completed_at";

fn load_event(conn: &Connection, event_id: u64) -> Result<Option<Event>, StoreError> {
    let event = conn
        .query_row(
            "SELECT id, title, is_business_trip, start_date, end_date, created_by, created_at
             FROM events WHERE id = ?1",
            [event_id as i64],
            |row| {
                Ok(Event {
                    id: row.get::<_, i64>(0)? as u64,
                    title: row.get(1)?,
                    is_business_trip: row.get(2)?,
                    start_date: row.get(3)?,
                    end_date: row.get(4)?,
                    created_by: row.get(5)?,
                    participants: Vec::new(),
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    let Some(mut event) = event else {
        return Ok(None);
    };
    event.participants = load_participants(conn, event_id)?;
    Ok(Some(event))
}

fn load_participants(conn: &Connection, event_id: u64) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT participant FROM event_participants WHERE event_id = ?1 ORDER BY participant",
    )?;
    let rows = stmt.query_map([event_id as i64], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

fn load_links(conn: &Connection, event_id: u64) -> Result<Vec<LinkedTask>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT l.id AS link_id, l.event_id, l.task_id, l.auto_completed, l.auto_completed_at,
                t.id, t.name, t.owner, t.project, t.due_date, t.status, t.created_at,
                t.completed_at
         FROM event_tasks l
         JOIN tasks t ON t.id = l.task_id
         WHERE l.event_id = ?1
         ORDER BY l.id",
    )?;
    let rows = stmt.query_map([event_id as i64], |row| {
        Ok(LinkedTask {
            link: TaskLink {
                id: row.get::<_, i64>("link_id")? as u64,
                event_id: row.get::<_, i64>("event_id")? as u64,
                task_id: row.get::<_, i64>("task_id")? as u64,
                auto_completed: row.get("auto_completed")?,
                auto_completed_at: row.get("auto_completed_at")?,
            },
            task: task_from_row(row)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn load_linked_event(conn: &Connection, event_id: u64) -> Result<Option<LinkedEvent>, StoreError> {
    let Some(event) = load_event(conn, event_id)? else {
        return Ok(None);
    };
    let links = load_links(conn, event_id)?;
    Ok(Some(LinkedEvent { event, links }))
}

impl TripStore for SqliteStore {
    fn ended_trip_events(&self, before: NaiveDate) -> Result<Vec<LinkedEvent>, StoreError> {
        let ids: Vec<i64> = {
            let mut stmt = self.conn.prepare(
                "SELECT e.id FROM events e
                 WHERE e.is_business_trip = 1
                   AND e.end_date < ?1
                   AND EXISTS (SELECT 1 FROM event_tasks l WHERE l.event_id = e.id)
                 ORDER BY e.end_date, e.id",
            )?;
            let rows = stmt.query_map([before], |row| row.get::<_, i64>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            // Deleted between the two queries: simply not a candidate.
            if let Some(event) = load_linked_event(&self.conn, id as u64)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn linked_event(&self, event_id: u64) -> Result<Option<LinkedEvent>, StoreError> {
        load_linked_event(&self.conn, event_id)
    }

    fn complete_link(
        &self,
        link_id: u64,
        at: DateTime<Utc>,
    ) -> Result<LinkCompletion, StoreError> {
        self.with_transaction(|conn| {
            let (already, task_id): (bool, i64) = conn
                .query_row(
                    "SELECT auto_completed, task_id FROM event_tasks WHERE id = ?1",
                    [link_id as i64],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or(StoreError::NotFound { kind: "link", id: link_id })?;
            if already {
                return Ok(LinkCompletion::AlreadyCompleted);
            }

            let status: String = conn
                .query_row("SELECT status FROM tasks WHERE id = ?1", [task_id], |row| {
                    row.get(0)
                })
                .optional()?
                .ok_or(StoreError::NotFound { kind: "task", id: task_id as u64 })?;

            let outcome = if status == TaskStatus::Done.as_str() {
                LinkCompletion::CaughtUp
            } else {
                conn.execute(
                    "UPDATE tasks SET status = 'done', completed_at = COALESCE(completed_at, ?2)
                     WHERE id = ?1 AND status <> 'done'",
                    params![task_id, at],
                )?;
                LinkCompletion::Completed
            };

            let flagged = conn.execute(
                "UPDATE event_tasks SET auto_completed = 1, auto_completed_at = ?2
                 WHERE id = ?1 AND auto_completed = 0",
                params![link_id as i64, at],
            )?;
            if flagged != 1 {
                return Err(StoreError::Invalid(format!(
                    "link {} changed while being completed",
                    link_id
                )));
            }
            Ok(outcome)
        })
    }

    fn append_log(&self, entry: NewLogEntry) -> Result<LogEntry, StoreError> {
        self.conn.execute(
            "INSERT INTO auto_completion_log
                 (executed_at, event_id, event_title, tasks_completed, status, error_detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.executed_at,
                entry.event_id as i64,
                entry.event_title,
                entry.tasks_completed as i64,
                entry.status.as_str(),
                entry.error_detail,
            ],
        )?;
        Ok(LogEntry {
            id: self.conn.last_insert_rowid() as u64,
            executed_at: entry.executed_at,
            event_id: entry.event_id,
            event_title: entry.event_title,
            tasks_completed: entry.tasks_completed,
            status: entry.status,
            error_detail: entry.error_detail,
        })
    }

    fn recent_logs(
        &self,
        limit: usize,
        status: Option<OutcomeStatus>,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, executed_at, event_id, event_title, tasks_completed, status, error_detail
             FROM auto_completion_log
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY executed_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), limit as i64],
            log_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl WorkloadStore for SqliteStore {
    fn add_task(&self, task: NewTask, at: DateTime<Utc>) -> Result<Task, StoreError> {
        self.conn.execute(
            "INSERT INTO tasks (name, owner, project, due_date, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
            params![task.name, task.owner, task.project, task.due_date, at],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(self.conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id],
            task_from_row,
        )?)
    }

    fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY id"))?;
        let rows = stmt.query_map([], task_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn set_task_status(
        &self,
        task_id: u64,
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let changed = if status == TaskStatus::Done {
            self.conn.execute(
                "UPDATE tasks SET status = ?2, completed_at = COALESCE(completed_at, ?3)
                 WHERE id = ?1",
                params![task_id as i64, status.as_str(), at],
            )?
        } else {
            self.conn.execute(
                "UPDATE tasks SET status = ?2, completed_at = NULL WHERE id = ?1",
                params![task_id as i64, status.as_str()],
            )?
        };
        if changed == 0 {
            return Err(StoreError::NotFound { kind: "task", id: task_id });
        }
        Ok(self.conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [task_id as i64],
            task_from_row,
        )?)
    }

    fn add_event(&self, event: NewEvent, at: DateTime<Utc>) -> Result<Event, StoreError> {
        validate_window(&event)?;
        let participants = dedup(event.participants);
        let id = self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO events
                     (title, is_business_trip, start_date, end_date, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.title,
                    event.is_business_trip,
                    event.start_date,
                    event.end_date,
                    event.created_by,
                    at
                ],
            )?;
            let id = conn.last_insert_rowid();
            for p in &participants {
                conn.execute(
                    "INSERT INTO event_participants (event_id, participant) VALUES (?1, ?2)",
                    params![id, p],
                )?;
            }
            Ok(id as u64)
        })?;
        load_event(&self.conn, id)?.ok_or(StoreError::NotFound { kind: "event", id })
    }

    fn events(&self) -> Result<Vec<Event>, StoreError> {
        let ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM events ORDER BY start_date, id")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(e) = load_event(&self.conn, id as u64)? {
                events.push(e);
            }
        }
        Ok(events)
    }

    fn remove_event(&self, event_id: u64) -> Result<(), StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM events WHERE id = ?1", [event_id as i64])?;
        if removed == 0 {
            return Err(StoreError::NotFound { kind: "event", id: event_id });
        }
        Ok(())
    }

    fn link_task(&self, event_id: u64, task_id: u64) -> Result<TaskLink, StoreError> {
        self.with_transaction(|conn| {
            let exists = |table: &str, id: u64| -> Result<bool, StoreError> {
                Ok(conn
                    .query_row(
                        &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                        [id as i64],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some())
            };
            if !exists("events", event_id)? {
                return Err(StoreError::NotFound { kind: "event", id: event_id });
            }
            if !exists("tasks", task_id)? {
                return Err(StoreError::NotFound { kind: "task", id: task_id });
            }
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO event_tasks (event_id, task_id) VALUES (?1, ?2)",
                params![event_id as i64, task_id as i64],
            )?;
            if inserted == 0 {
                return Err(StoreError::Invalid(format!(
                    "task {} is already linked to event {}",
                    task_id, event_id
                )));
            }
            Ok(TaskLink {
                id: conn.last_insert_rowid() as u64,
                event_id,
                task_id,
                auto_completed: false,
                auto_completed_at: None,
            })
        })
    }

    fn links(&self) -> Result<Vec<TaskLink>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_id, task_id, auto_completed, auto_completed_at
             FROM event_tasks ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TaskLink {
                id: row.get::<_, i64>(0)? as u64,
                event_id: row.get::<_, i64>(1)? as u64,
                task_id: row.get::<_, i64>(2)? as u64,
                auto_completed: row.get(3)?,
                auto_completed_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
