//! Notification sinks for alert transitions
//!
//! The engine hands every create/resolve transition to a
//! [`NotificationSink`]. Delivery is bounded by the engine's notification
//! timeout, so a slow sink can delay but never stall evaluation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use super::{AlertRecord, AlertStatus};
use crate::error::{MonitoringError, MonitoringResult};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, record: &AlertRecord) -> MonitoringResult<()>;
}

/// Human-readable notification block for one transition
pub fn format_notification(record: &AlertRecord) -> String {
    format!(
        "ALERT NOTIFICATION\n\
         Status: {}\n\
         Rule: {}\n\
         Metric: {}\n\
         Current Value: {:.2}\n\
         Threshold: {}\n\
         Severity: {}\n\
         Description: {}\n\
         Time: {}",
        record.status.to_string().to_uppercase(),
        record.rule_name,
        record.metric,
        record.current_value,
        record.threshold,
        record.severity.to_string().to_uppercase(),
        record.description,
        record.event_time().to_rfc3339(),
    )
}

/// Appends one text block per transition to a log file
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NotificationSink for FileSink {
    #[instrument(skip_all, fields(rule = %record.rule_name))]
    async fn notify(&self, record: &AlertRecord) -> MonitoringResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MonitoringError::export(&self.path, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MonitoringError::export(&self.path, e))?;

        let entry = format!(
            "{}: {}\n\n",
            Utc::now().to_rfc3339(),
            format_notification(record)
        );

        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| MonitoringError::export(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| MonitoringError::export(&self.path, e))?;

        Ok(())
    }
}

/// Posts a JSON payload per transition to a webhook
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> MonitoringResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitoringError::InvalidConfig(format!("webhook client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    #[instrument(skip_all, fields(rule = %record.rule_name))]
    async fn notify(&self, record: &AlertRecord) -> MonitoringResult<()> {
        let emoji = match record.status {
            AlertStatus::Active => "🔴",
            AlertStatus::Resolved => "✅",
        };

        let payload = json!({
            "message": format!("{emoji} {}", format_notification(record)),
            "alert": record,
            "timestamp": Utc::now().to_rfc3339()
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                    Ok(())
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                    Err(MonitoringError::Notification(format!(
                        "webhook returned {}",
                        response.status()
                    )))
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
                Err(MonitoringError::Notification(e.to_string()))
            }
        }
    }
}

/// Emits transitions as tracing events only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, record: &AlertRecord) -> MonitoringResult<()> {
        match record.status {
            AlertStatus::Active => warn!("{}", format_notification(record)),
            AlertStatus::Resolved => info!("{}", format_notification(record)),
        }
        Ok(())
    }
}

/// Forwards transitions into a channel for the host to deliver
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<AlertRecord>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, record: &AlertRecord) -> MonitoringResult<()> {
        self.sender
            .send(record.clone())
            .map_err(|_| MonitoringError::Notification("receiver dropped".to_string()))
    }
}
