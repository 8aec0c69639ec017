//! Daily trigger loop for the reconciler.
//!
//! Cron expressions use the familiar five fields; the seconds field the
//! `cron` crate expects is prepended as `0`.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::info;

use crate::error::ConfigError;

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, ConfigError> {
    let full_expr = format!("0 {}", expr.trim());
    Schedule::from_str(&full_expr).map_err(|e| ConfigError::Cron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time strictly after `after`, evaluated in `tz`.
pub fn next_fire(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// Sleeps until each fire time and calls `job` with it. Returns only when the
/// schedule has no further fire times.
pub fn run_forever<F>(schedule: &Schedule, tz: Tz, mut job: F) -> Result<(), ConfigError>
where
    F: FnMut(DateTime<Utc>),
{
    loop {
        let now = Utc::now();
        let Some(next) = next_fire(schedule, tz, now) else {
            return Err(ConfigError::Cron {
                expr: schedule.to_string(),
                reason: "no upcoming fire time".into(),
            });
        };
        info!(next = %next.with_timezone(&tz), "next reconciliation scheduled");
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        std::thread::sleep(wait);
        job(next);
    }
}
