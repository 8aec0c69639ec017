//! Entry point used by schedulers and operators.
//!
//! A trigger carries a `dry_run` flag and, optionally, an `Authorization`
//! header value. When a token is configured the header must be
//! `Bearer <token>`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::ReconcileError;
use crate::reconcile::{Candidate, Reconciler, RunReport};
use crate::storage::TripStore;

#[derive(Debug, Clone, Default)]
pub struct TriggerRequest {
    pub dry_run: bool,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerResponse {
    DryRun { candidates: Vec<Candidate> },
    Run { report: RunReport },
}

impl TriggerResponse {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        match self {
            TriggerResponse::DryRun { candidates } => {
                let tasks: usize = candidates.iter().map(|c| c.pending.len()).sum();
                format!(
                    "Dry run: {} event(s) would be processed, {} task link(s) pending",
                    candidates.len(),
                    tasks
                )
            }
            TriggerResponse::Run { report } => format!(
                "Processed {} event(s), completed {} task(s)",
                report.outcomes.len(),
                report.tasks_completed()
            ),
        }
    }
}

pub fn handle<S: TripStore + ?Sized>(
    reconciler: &Reconciler<'_, S>,
    expected_token: Option<&str>,
    request: &TriggerRequest,
) -> Result<TriggerResponse, ReconcileError> {
    handle_at(reconciler, expected_token, request, Utc::now())
}

pub fn handle_at<S: TripStore + ?Sized>(
    reconciler: &Reconciler<'_, S>,
    expected_token: Option<&str>,
    request: &TriggerRequest,
    now: DateTime<Utc>,
) -> Result<TriggerResponse, ReconcileError> {
    authorize(expected_token, request.authorization.as_deref())?;
    if request.dry_run {
        Ok(TriggerResponse::DryRun {
            candidates: reconciler.preview_at(now)?,
        })
    } else {
        Ok(TriggerResponse::Run {
            report: reconciler.run_at(now)?,
        })
    }
}

/// Accepts anything when no token is expected.
pub fn authorize(expected: Option<&str>, authorization: Option<&str>) -> Result<(), ReconcileError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = authorization.and_then(bearer_token);
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => {
            warn!("reconciliation trigger rejected: missing or invalid bearer token");
            Err(ReconcileError::Unauthorized)
        }
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
