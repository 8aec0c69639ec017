use chrono::{Local, NaiveDate, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use tracing::error;

use crate::config::Config;
use crate::error::CliError;
use crate::models::{Event, NewEvent, NewTask, OutcomeStatus, Task, TaskLink, TaskStatus};
use crate::notify;
use crate::reconcile::{Candidate, Reconciler, RunReport};
use crate::schedule;
use crate::storage::Store;
use crate::trigger::{self, TriggerRequest, TriggerResponse};

fn parse_date(label: &str, raw: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        CliError::InvalidInput(format!("Invalid {} '{}': {}. Use YYYY-MM-DD.", label, raw, e))
    })
}

fn header(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
        .collect()
}

fn status_color(status: OutcomeStatus) -> Color {
    match status {
        OutcomeStatus::Success => Color::Green,
        OutcomeStatus::Partial => Color::Yellow,
        OutcomeStatus::Failed => Color::Red,
    }
}

/// Adds a new task for an employee.
pub fn cmd_task_add(
    store: &dyn Store,
    name: String,
    owner: String,
    project: Option<String>,
    due: Option<String>,
    silent: bool,
) -> Result<Task, CliError> {
    let due_date = due.map(|d| parse_date("due date", &d)).transpose()?;
    let task = store.add_task(
        NewTask {
            name,
            owner,
            project,
            due_date,
        },
        Utc::now(),
    )?;
    if !silent { println!("Task added (id = {})", task.id); }
    Ok(task)
}

/// Lists tasks in a formatted table.
///
/// By default, hides completed tasks unless `all` is true.
pub fn cmd_task_list(store: &dyn Store, all: bool) -> Result<(), CliError> {
    let mut tasks = store.tasks()?;
    if !all {
        tasks.retain(|t| t.status != TaskStatus::Done);
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    tasks.sort_by_key(|t| (t.due_date.is_none(), t.due_date, t.id));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["ID", "Name", "Owner", "Project", "Due", "Status"]));

    let today = Local::now().date_naive();
    for t in tasks {
        let overdue = t.status != TaskStatus::Done && t.due_date.is_some_and(|d| d < today);
        let color = match t.status {
            TaskStatus::Done => Color::Green,
            TaskStatus::InProgress => Color::Cyan,
            TaskStatus::Pending => Color::Yellow,
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.name),
            Cell::new(&t.owner),
            Cell::new(t.project.unwrap_or_default()),
            Cell::new(t.due_date.map(|d| d.to_string()).unwrap_or_else(|| "-".into()))
                .fg(if overdue { Color::Red } else { Color::Reset }),
            Cell::new(t.status).fg(color),
        ]);
    }

    println!("{table}");
    Ok(())
}

/// Sets a task's status by ID.
pub fn cmd_task_status(store: &dyn Store, id: u64, status: String, silent: bool) -> Result<Task, CliError> {
    let status: TaskStatus = status.parse().map_err(CliError::InvalidInput)?;
    let task = store.set_task_status(id, status, Utc::now())?;
    if !silent { println!("Task {} is now {}.", id, task.status); }
    Ok(task)
}

/// Adds a calendar event. `trip` marks it as a business trip.
#[allow(clippy::too_many_arguments)]
pub fn cmd_event_add(
    store: &dyn Store,
    title: String,
    start: String,
    end: String,
    created_by: String,
    trip: bool,
    participants: Vec<String>,
    silent: bool,
) -> Result<Event, CliError> {
    let start_date = parse_date("start date", &start)?;
    let end_date = parse_date("end date", &end)?;
    let event = store.add_event(
        NewEvent {
            title,
            is_business_trip: trip,
            start_date,
            end_date,
            created_by,
            participants,
        },
        Utc::now(),
    )?;
    if !silent { println!("Event added (id = {})", event.id); }
    Ok(event)
}

/// Links a task to an event.
pub fn cmd_event_link(store: &dyn Store, event_id: u64, task_id: u64, silent: bool) -> Result<TaskLink, CliError> {
    let link = store.link_task(event_id, task_id)?;
    if !silent { println!("Task {} linked to event {}.", task_id, event_id); }
    Ok(link)
}

/// Removes an event and its task links.
pub fn cmd_event_remove(store: &dyn Store, id: u64, silent: bool) -> Result<(), CliError> {
    store.remove_event(id)?;
    if !silent { println!("Event {} removed.", id); }
    Ok(())
}

/// Lists events with their link progress.
pub fn cmd_event_list(store: &dyn Store) -> Result<(), CliError> {
    let events = store.events()?;
    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }
    let links = store.links()?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["ID", "Title", "Trip", "Start", "End", "Participants", "Linked", "Auto-done"]));

    for e in events {
        let linked: Vec<&TaskLink> = links.iter().filter(|l| l.event_id == e.id).collect();
        let auto_done = linked.iter().filter(|l| l.auto_completed).count();
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(&e.title),
            Cell::new(if e.is_business_trip { "yes" } else { "-" }),
            Cell::new(e.start_date),
            Cell::new(e.end_date),
            Cell::new(e.participants.join(", ")),
            Cell::new(linked.len()),
            Cell::new(format!("{}/{}", auto_done, linked.len())),
        ]);
    }

    println!("{table}");
    Ok(())
}

/// Runs (or previews) trip auto-completion through the trigger.
pub fn cmd_reconcile(
    store: &dyn Store,
    config: &Config,
    dry_run: bool,
    authorization: Option<String>,
    json: bool,
) -> Result<TriggerResponse, CliError> {
    let publisher = notify::from_config(&config.notify)?;
    let reconciler = Reconciler::new(store, publisher.as_ref(), config.timezone()?);
    let request = TriggerRequest { dry_run, authorization };
    let response = trigger::handle(&reconciler, config.expected_token(), &request)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        match &response {
            TriggerResponse::DryRun { candidates } => print_candidates(candidates),
            TriggerResponse::Run { report } => print_report(report),
        }
        println!("{}", response.summary());
    }
    Ok(response)
}

fn print_candidates(candidates: &[Candidate]) {
    if candidates.is_empty() {
        println!("No ended business trips with pending tasks.");
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Event", "Title", "Ended", "Task", "Owner", "Task status"]));
    for c in candidates {
        for p in &c.pending {
            table.add_row(vec![
                Cell::new(c.event_id),
                Cell::new(&c.title),
                Cell::new(c.end_date),
                Cell::new(format!("#{} {}", p.task_id, p.task_name)),
                Cell::new(&p.owner),
                Cell::new(p.status),
            ]);
        }
    }
    println!("{table}");
}

fn print_report(report: &RunReport) {
    if report.outcomes.is_empty() {
        println!("Nothing to reconcile.");
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Event", "Title", "Completed", "Caught up", "Failed", "Status"]));
    for o in &report.outcomes {
        table.add_row(vec![
            Cell::new(o.event_id),
            Cell::new(&o.title),
            Cell::new(o.tasks_completed),
            Cell::new(o.links_caught_up),
            Cell::new(o.failures),
            Cell::new(o.status).fg(status_color(o.status)),
        ]);
    }
    println!("{table}");
}

/// Shows the most recent auto-completion audit entries.
pub fn cmd_history(
    store: &dyn Store,
    config: &Config,
    limit: usize,
    status: Option<String>,
    json: bool,
) -> Result<(), CliError> {
    let status = status
        .map(|s| s.parse::<OutcomeStatus>())
        .transpose()
        .map_err(CliError::InvalidInput)?;
    let entries = store.recent_logs(limit, status)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No auto-completion history.");
        return Ok(());
    }

    let tz = config.timezone()?;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&["Executed", "Event", "Title", "Completed", "Status", "Error"]));
    for e in entries {
        table.add_row(vec![
            Cell::new(e.executed_at.with_timezone(&tz).format("%Y-%m-%d %H:%M")),
            Cell::new(e.event_id),
            Cell::new(&e.event_title),
            Cell::new(e.tasks_completed),
            Cell::new(e.status).fg(status_color(e.status)),
            Cell::new(e.error_detail.unwrap_or_default()),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Runs the reconciler on the configured cron schedule until killed.
pub fn cmd_schedule(store: &dyn Store, config: &Config) -> Result<(), CliError> {
    let tz = config.timezone()?;
    let cron = schedule::parse_cron(&config.reconcile.schedule)?;
    let publisher = notify::from_config(&config.notify)?;
    let reconciler = Reconciler::new(store, publisher.as_ref(), tz);

    schedule::run_forever(&cron, tz, |_| {
        if let Err(e) = reconciler.run() {
            error!(error = %e, "scheduled reconciliation failed");
        }
    })?;
    Ok(())
}
