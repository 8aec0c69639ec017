//! Change notifications for connected clients.
//!
//! A reconciliation run publishes at most one [`ChangeNotification`] carrying
//! every per-event outcome. Delivery is best effort.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::NotifyConfig;
use crate::error::NotifyError;
use crate::reconcile::EventOutcome;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TasksAutoCompleted,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub kind: NotificationKind,
    pub executed_at: DateTime<Utc>,
    pub outcomes: Vec<EventOutcome>,
}

impl ChangeNotification {
    pub fn tasks_auto_completed(executed_at: DateTime<Utc>, outcomes: Vec<EventOutcome>) -> Self {
        Self {
            kind: NotificationKind::TasksAutoCompleted,
            executed_at,
            outcomes,
        }
    }
}

pub trait Publisher {
    fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError>;
}

/// Emits the notification as a tracing event. Used when no channel is configured.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)?;
        info!(target: "workload_tracker::notify", %payload, "tasks changed");
        Ok(())
    }
}

/// Appends one JSON line per notification to a file that subscribers tail.
#[derive(Debug)]
pub struct OutboxPublisher {
    path: PathBuf,
}

impl OutboxPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Publisher for OutboxPublisher {
    fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        let mut line = serde_json::to_string(notification)?;
        line.push('\n');
        let outbox_err = |source| NotifyError::Outbox {
            path: self.path.clone(),
            source,
        };
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(outbox_err)?;
        f.write_all(line.as_bytes()).map_err(outbox_err)
    }
}

/// POSTs the notification as JSON to a broadcast endpoint.
pub struct WebhookPublisher {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

impl Publisher for WebhookPublisher {
    fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::WebhookStatus(status.as_u16()));
        }
        Ok(())
    }
}

/// Delivers to every channel; fails if any channel failed.
pub struct FanoutPublisher {
    channels: Vec<Box<dyn Publisher>>,
}

impl FanoutPublisher {
    pub fn new(channels: Vec<Box<dyn Publisher>>) -> Self {
        Self { channels }
    }
}

impl Publisher for FanoutPublisher {
    fn publish(&self, notification: &ChangeNotification) -> Result<(), NotifyError> {
        let mut failed = 0;
        for channel in &self.channels {
            if let Err(e) = channel.publish(notification) {
                warn!(error = %e, "notification channel failed");
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(NotifyError::Fanout {
                failed,
                total: self.channels.len(),
            });
        }
        Ok(())
    }
}

/// Builds the publisher described by the `[notify]` section.
pub fn from_config(config: &NotifyConfig) -> Result<Box<dyn Publisher>, NotifyError> {
    let mut channels: Vec<Box<dyn Publisher>> = Vec::new();
    if let Some(path) = &config.outbox {
        channels.push(Box::new(OutboxPublisher::new(path.clone())));
    }
    if let Some(url) = &config.webhook_url {
        channels.push(Box::new(WebhookPublisher::new(
            url.clone(),
            config.webhook_token.clone(),
        )?));
    }
    Ok(match channels.len() {
        0 => Box::new(LogPublisher),
        1 => channels.remove(0),
        _ => Box::new(FanoutPublisher::new(channels)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutcomeStatus;

    fn sample() -> ChangeNotification {
        ChangeNotification::tasks_auto_completed(
            Utc::now(),
            vec![EventOutcome {
                event_id: 7,
                title: "Kunjungan Dinas Bandung".into(),
                tasks_completed: 2,
                links_caught_up: 0,
                failures: 0,
                status: OutcomeStatus::Success,
                error_detail: None,
            }],
        )
    }

    #[test]
    fn payload_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["kind"], "tasks_auto_completed");
        assert_eq!(value["outcomes"][0]["title"], "Kunjungan Dinas Bandung");
        assert_eq!(value["outcomes"][0]["status"], "success");
        assert!(value["outcomes"][0].get("error_detail").is_none());
    }

    #[test]
    fn outbox_appends_one_line_per_publish() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("outbox.jsonl");
        let outbox = OutboxPublisher::new(&path);
        outbox.publish(&sample()).unwrap();
        outbox.publish(&sample()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: ChangeNotification = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.outcomes[0].tasks_completed, 2);
    }

    #[test]
    fn fanout_reports_failed_channels() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = OutboxPublisher::new(dir.path().join("missing/dir/outbox.jsonl"));
        let fanout = FanoutPublisher::new(vec![Box::new(LogPublisher), Box::new(broken)]);
        match fanout.publish(&sample()) {
            Err(NotifyError::Fanout { failed, total }) => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected fanout failure, got {:?}", other),
        }
    }

    #[test]
    fn empty_config_logs_only() {
        let publisher = from_config(&NotifyConfig::default()).unwrap();
        assert!(publisher.publish(&sample()).is_ok());
    }
}
