//! # Workload tracker
//!
//! Workload bookkeeping for a government office: employee tasks, a calendar
//! of events (some of them business trips) linked to those tasks, and an
//! audit log of automatic task completion.
//!
//! ## Business-trip auto-completion
//!
//! Once a business trip has ended (its end date is before today in the office
//! time zone), every task linked to it is marked `done`, exactly once. Each
//! run:
//!
//! 1. lists ended business trips that have task links,
//! 2. re-checks each trip, then completes its outstanding links one by one
//!    (task status and link flag are written together),
//! 3. appends one audit row per trip (`success`, `partial` or `failed`),
//! 4. publishes one aggregate change notification when anything changed.
//!
//! A dry run only lists what would change.
//!
//! ## Usage
//!
//! ```bash
//! workload task add "Laporan perjalanan" --owner budi --due 2025-03-14
//! workload event add "Kunjungan Dinas Bandung" --start 2025-03-10 --end 2025-03-12 \
//!     --created-by budi --trip --participant budi --participant sari
//! workload event link 1 1
//!
//! workload reconcile --dry-run
//! workload reconcile --authorization "Bearer $RECONCILE_TOKEN"
//! workload history --limit 20 --status partial
//!
//! # long-running daily trigger
//! workload schedule
//! ```
//!
//! ## Data storage
//!
//! SQLite by default, in your local data directory:
//! *   Linux: `~/.local/share/workload-tracker/workload.db`
//! *   macOS: `~/Library/Application Support/workload-tracker/workload.db`
//!
//! Override with `WORKLOAD_DB` or `[storage]` in the config file. A single
//! JSON file backend (`backend = "json"`) is available for small setups.

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod schedule;
pub mod storage;
pub mod trigger;
