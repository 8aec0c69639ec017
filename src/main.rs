use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::EnvFilter;

use workload_tracker::commands::*;
use workload_tracker::config::Config;
use workload_tracker::error::CliError;
use workload_tracker::storage::open_store;

#[derive(Parser)]
#[command(name = "workload")]
#[command(about = "Office workload tracker with business-trip auto-completion", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "WORKLOAD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Manage calendar events and their task links
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Complete the tasks of ended business trips
    Reconcile {
        /// Only list what would change
        #[arg(long)]
        dry_run: bool,
        /// Authorization header value, e.g. "Bearer <token>"
        #[arg(long, env = "RECONCILE_AUTHORIZATION")]
        authorization: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the auto-completion audit log, newest first
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Only entries with this outcome (success, partial, failed)
        #[arg(short, long)]
        status: Option<String>,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run reconciliation on the configured cron schedule
    Schedule,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Add a new task
    Add {
        /// Task name (quoted if it has spaces)
        name: String,
        /// Employee the task is assigned to
        #[arg(short, long)]
        owner: String,
        /// Project or work unit
        #[arg(short, long)]
        project: Option<String>,
        /// Due date in YYYY-MM-DD
        #[arg(short, long)]
        due: Option<String>,
    },
    /// List tasks
    List {
        /// Show completed tasks
        #[arg(short, long)]
        all: bool,
    },
    /// Set a task's status (pending, in-progress, done)
    Status {
        id: u64,
        status: String,
    },
}

#[derive(Subcommand)]
enum EventCommands {
    /// Add a new event
    Add {
        /// Event title
        title: String,
        /// First day in YYYY-MM-DD
        #[arg(short, long)]
        start: String,
        /// Last day (inclusive) in YYYY-MM-DD
        #[arg(short, long)]
        end: String,
        /// Employee creating the event
        #[arg(long)]
        created_by: String,
        /// Mark as a business trip
        #[arg(long)]
        trip: bool,
        /// Participant (repeatable)
        #[arg(short, long = "participant")]
        participants: Vec<String>,
    },
    /// Link a task to an event
    Link {
        event_id: u64,
        task_id: u64,
    },
    /// List events
    List,
    /// Remove an event and its task links
    Remove {
        id: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("workload_tracker=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Commands::Completions { shell } = &cli.command {
        let shell_enum = match shell.as_str() {
            "bash" => Shell::Bash,
            "zsh" => Shell::Zsh,
            "fish" => Shell::Fish,
            "powershell" => Shell::PowerShell,
            "elvish" => Shell::Elvish,
            _ => return Err(CliError::InvalidInput(format!("Unsupported shell: {}", shell))),
        };
        let mut cmd = Cli::command();
        generate(shell_enum, &mut cmd, "workload", &mut io::stdout());
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    let store = open_store(config.storage.backend, &config.storage_path())?;
    let store = store.as_ref();

    match cli.command {
        Commands::Task { command } => match command {
            TaskCommands::Add { name, owner, project, due } => cmd_task_add(store, name, owner, project, due, false).map(|_| ()),
            TaskCommands::List { all } => cmd_task_list(store, all),
            TaskCommands::Status { id, status } => cmd_task_status(store, id, status, false).map(|_| ()),
        },
        Commands::Event { command } => match command {
            EventCommands::Add { title, start, end, created_by, trip, participants } => {
                cmd_event_add(store, title, start, end, created_by, trip, participants, false).map(|_| ())
            }
            EventCommands::Link { event_id, task_id } => cmd_event_link(store, event_id, task_id, false).map(|_| ()),
            EventCommands::List => cmd_event_list(store),
            EventCommands::Remove { id } => cmd_event_remove(store, id, false),
        },
        Commands::Reconcile { dry_run, authorization, json } => {
            cmd_reconcile(store, &config, dry_run, authorization, json).map(|_| ())
        }
        Commands::History { limit, status, json } => cmd_history(store, &config, limit, status, json),
        Commands::Schedule => cmd_schedule(store, &config),
        Commands::Completions { .. } => Ok(()),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
