//! AlertManager - Evaluates alert rules against buffered metrics
//!
//! ## Edge-Triggered State Machine
//!
//! Each rule is keyed by `(rule name, metric)`. On every evaluation pass the
//! representative value is the mean of the rule's metric over its look-back
//! window:
//!
//! ```text
//! condition true,  no active alert  → create (Active),  append to history, notify
//! condition false, active alert     → resolve (Resolved), append to history, notify
//! condition true,  active alert     → nothing
//! condition false, no active alert  → nothing
//! ```
//!
//! Repeated ticks with an unchanged condition therefore never notify twice.
//! A rule whose metric has no points in its window is skipped for that pass.

pub mod notifier;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    clock::SharedClock,
    collector::MetricsCollector,
    config::{AlertRule, MonitoringConfig, Severity},
    error::{MonitoringError, MonitoringResult},
};

pub use notifier::{
    ChannelSink, FileSink, LogSink, NotificationSink, WebhookSink, format_notification,
};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of history entries included in a summary
pub const RECENT_ALERTS: usize = 10;

/// Identity of an alert: the rule that raised it and the metric it watches
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub rule_name: String,
    pub metric: String,
}

impl AlertKey {
    pub fn for_rule(rule: &AlertRule) -> Self {
        Self {
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Active => f.write_str("active"),
            AlertStatus::Resolved => f.write_str("resolved"),
        }
    }
}

/// An alert, either currently active or as recorded in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub rule_name: String,
    pub metric: String,
    pub current_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub description: String,
    pub triggered_at: DateTime<Utc>,
    pub status: AlertStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            rule_name: self.rule_name.clone(),
            metric: self.metric.clone(),
        }
    }

    /// When this record's transition happened
    pub fn event_time(&self) -> DateTime<Utc> {
        self.resolved_at.unwrap_or(self.triggered_at)
    }
}

/// Read-only view of the engine's state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSummary {
    pub active_alerts: usize,
    pub total_rules: usize,
    pub alert_history_count: usize,
    pub active_alert_details: Vec<AlertRecord>,
    pub recent_alerts: Vec<AlertRecord>,
}

#[derive(Debug, Default)]
struct AlertState {
    active: BTreeMap<AlertKey, AlertRecord>,
    history: Vec<AlertRecord>,
}

pub struct AlertManager {
    collector: Arc<MetricsCollector>,
    rules: Vec<AlertRule>,
    state: Mutex<AlertState>,
    sink: Arc<dyn NotificationSink>,
    clock: SharedClock,
    interval: Duration,
    notification_timeout: Duration,
}

impl AlertManager {
    pub fn new(
        collector: Arc<MetricsCollector>,
        sink: Arc<dyn NotificationSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            collector,
            rules: Vec::new(),
            state: Mutex::new(AlertState::default()),
            sink,
            clock,
            interval: DEFAULT_INTERVAL,
            notification_timeout: DEFAULT_NOTIFICATION_TIMEOUT,
        }
    }

    /// Build the engine from configuration, seeded with the configured rules
    ///
    /// Transitions go to the webhook when one is configured, otherwise they
    /// are appended to the alert log.
    pub fn from_config(
        config: &MonitoringConfig,
        collector: Arc<MetricsCollector>,
        clock: SharedClock,
    ) -> MonitoringResult<Self> {
        let sink: Arc<dyn NotificationSink> = match &config.webhook_url {
            Some(url) => Arc::new(WebhookSink::new(url, config.notification_timeout())?),
            None => Arc::new(FileSink::new(&config.alert_log_path)),
        };

        let mut manager = Self::new(collector, sink, clock)
            .with_interval(config.evaluation_interval())
            .with_notification_timeout(config.notification_timeout());

        for rule in config.rules() {
            manager.add_rule(rule);
        }

        Ok(manager)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self
    }

    pub fn add_rule(&mut self, rule: AlertRule) {
        info!("added alert rule: {}", rule.name);
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    fn state(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Single evaluation pass over all rules, in registration order
    ///
    /// Returns the transitions of this pass. Notifications are dispatched
    /// after the state has been updated.
    #[instrument(skip(self))]
    pub async fn evaluate(&self) -> Vec<AlertRecord> {
        let now = self.clock.now();

        let transitions: Vec<AlertRecord> = {
            let mut state = self.state();
            self.rules
                .iter()
                .filter_map(|rule| match self.evaluate_rule(rule, now, &mut state) {
                    Ok(transition) => transition,
                    Err(e) => {
                        error!("error evaluating alert rule {}: {e}", rule.name);
                        None
                    }
                })
                .collect()
        };

        for record in &transitions {
            self.dispatch(record).await;
        }

        transitions
    }

    fn evaluate_rule(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
        state: &mut AlertState,
    ) -> MonitoringResult<Option<AlertRecord>> {
        let points = self.collector.query(&rule.metric, rule.window());
        if points.is_empty() {
            trace!("no recent points for {}, skipping {}", rule.metric, rule.name);
            return Ok(None);
        }

        let current_value = points.iter().map(|p| p.value).sum::<f64>() / points.len() as f64;
        if !current_value.is_finite() {
            return Err(MonitoringError::evaluation(
                &rule.name,
                format!("non-finite value for {}", rule.metric),
            ));
        }

        let triggered = rule.condition.is_met(current_value, rule.threshold);
        let key = AlertKey::for_rule(rule);

        trace!(
            "{}: {} {current_value:.2} {} {} → {triggered}",
            rule.name, rule.metric, rule.condition, rule.threshold
        );

        match (triggered, state.active.contains_key(&key)) {
            (true, false) => {
                let record = AlertRecord {
                    rule_name: rule.name.clone(),
                    metric: rule.metric.clone(),
                    current_value,
                    threshold: rule.threshold,
                    severity: rule.severity,
                    description: rule.description.clone(),
                    triggered_at: now,
                    status: AlertStatus::Active,
                    resolved_at: None,
                };

                warn!("ALERT TRIGGERED: {} - {}", rule.name, rule.description);
                state.history.push(record.clone());
                state.active.insert(key, record.clone());
                Ok(Some(record))
            }
            (false, true) => {
                let Some(mut record) = state.active.remove(&key) else {
                    return Ok(None);
                };

                record.status = AlertStatus::Resolved;
                record.resolved_at = Some(now);
                record.current_value = current_value;

                info!("ALERT RESOLVED: {}", rule.name);
                state.history.push(record.clone());
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    async fn dispatch(&self, record: &AlertRecord) {
        match tokio::time::timeout(self.notification_timeout, self.sink.notify(record)).await {
            Ok(Ok(())) => debug!("notified {} ({})", record.rule_name, record.status),
            Ok(Err(e)) => error!("failed to notify {}: {e}", record.rule_name),
            Err(_) => warn!(
                "notification for {} timed out after {:?}",
                record.rule_name, self.notification_timeout
            ),
        }
    }

    pub fn active_alerts(&self) -> Vec<AlertRecord> {
        self.state().active.values().cloned().collect()
    }

    pub fn is_active(&self, key: &AlertKey) -> bool {
        self.state().active.contains_key(key)
    }

    pub fn history(&self) -> Vec<AlertRecord> {
        self.state().history.clone()
    }

    /// Drop all but the most recent `keep_last` history entries
    pub fn truncate_history(&self, keep_last: usize) {
        let mut state = self.state();
        let excess = state.history.len().saturating_sub(keep_last);
        state.history.drain(..excess);
    }

    pub fn get_summary(&self) -> AlertSummary {
        let state = self.state();
        let recent_start = state.history.len().saturating_sub(RECENT_ALERTS);

        AlertSummary {
            active_alerts: state.active.len(),
            total_rules: self.rules.len(),
            alert_history_count: state.history.len(),
            active_alert_details: state.active.values().cloned().collect(),
            recent_alerts: state.history[recent_start..].to_vec(),
        }
    }

    /// Evaluation loop, runs until `cancel` fires
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("starting alert evaluation every {:?}", self.interval);

        while !cancel.is_cancelled() {
            let transitions = self.evaluate().await;
            if !transitions.is_empty() {
                debug!("evaluation produced {} transition(s)", transitions.len());
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("stopping alert evaluation");
    }
}
