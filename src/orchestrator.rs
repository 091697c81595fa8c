//! MonitoringOrchestrator - Runs collection, alerting and health checks
//!
//! ## Lifecycle
//!
//! ```text
//! start() ─┬─ spawn collector loop   (collection_interval)
//!          ├─ spawn alert loop       (evaluation_interval)
//!          └─ spawn health loop      (health_interval)
//!
//! stop()  ── cancel token → loops exit at their next sleep → wait (≤ stop_timeout)
//!
//! Running ──stop()──▶ Stopping ──loops returned──▶ stopped
//!                        │
//!                        └─ start() refuses until the old loops are gone
//! ```
//!
//! The three loops are independent: they share no schedule and only meet at
//! the collector's buffer, which the alert loop reads while the collector
//! appends. The orchestrator holds the components behind `Arc`s and only
//! reads their summaries.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::{
    alerts::{AlertManager, AlertSummary},
    clock::{SharedClock, system_clock},
    collector::MetricsCollector,
    config::MonitoringConfig,
    error::{MonitoringError, MonitoringResult},
    health::{HealthChecker, HealthSummary},
    logs::{LogAnalysis, LogAnalyzer},
    probes::{ApplicationMetrics, ApplicationProbe, MetricProbe, SysinfoSampler, SystemProbe},
};

/// Uptime below this percentage triggers a reliability recommendation
pub const UPTIME_TARGET_PERCENT: f64 = 99.0;

/// Log errors above this count trigger a log review recommendation
pub const ERROR_COUNT_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Latest health status, or `unknown` without health data
    pub overall_health: String,
    pub uptime_percentage: Option<f64>,
    pub active_alerts: usize,
    pub monitoring_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_metrics_collected: usize,
    pub collection_interval_secs: u64,
    pub metrics_exported_to: PathBuf,
}

/// Health section of the report; an error message when no data is available
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HealthReport {
    Summary(HealthSummary),
    Unavailable { error: String },
}

impl HealthReport {
    pub fn summary(&self) -> Option<&HealthSummary> {
        match self {
            HealthReport::Summary(summary) => Some(summary),
            HealthReport::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub report_generated_at: DateTime<Utc>,
    pub monitoring_period: String,
    pub system_status: SystemStatus,
    pub metrics_summary: MetricsSummary,
    pub alert_summary: AlertSummary,
    pub health_summary: HealthReport,
    pub log_analysis: LogAnalysis,
    pub recommendations: Vec<String>,
}

/// Rule-based recommendations from the alert, health and log summaries
pub fn recommendations(
    alerts: &AlertSummary,
    health: Option<&HealthSummary>,
    logs: &LogAnalysis,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if alerts.active_alerts > 0 {
        recommendations.push(format!(
            "Address {} active alerts immediately",
            alerts.active_alerts
        ));
    }

    if let Some(uptime) = health.map(|h| h.uptime_percentage)
        && uptime < UPTIME_TARGET_PERCENT
    {
        recommendations.push(format!(
            "Investigate system reliability issues (uptime: {uptime:.2}%)"
        ));
    }

    if logs.total_errors > ERROR_COUNT_LIMIT {
        recommendations.push(format!(
            "High error count detected ({}), review error logs",
            logs.total_errors
        ));
    }

    if recommendations.is_empty() {
        recommendations.push("System is operating normally, continue monitoring".to_string());
    }

    recommendations
}

enum Lifecycle {
    Running {
        cancel: CancellationToken,
        tracker: TaskTracker,
    },
    /// Cancelled, but some loops have not returned yet
    Stopping(TaskTracker),
}

pub struct MonitoringOrchestrator {
    config: MonitoringConfig,
    collector: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
    health: Arc<HealthChecker>,
    logs: LogAnalyzer,
    application: Option<ApplicationMetrics>,
    clock: SharedClock,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl MonitoringOrchestrator {
    /// Build the default setup: system and application probes, the
    /// configured (or default) alert rules and the configured health battery
    pub fn new(config: MonitoringConfig) -> MonitoringResult<Self> {
        config.validate()?;

        let clock = system_clock();
        let sampler = Arc::new(SysinfoSampler::new());
        let application = ApplicationMetrics::new()?;

        let probes: Vec<Box<dyn MetricProbe>> = vec![
            Box::new(SystemProbe::new(sampler.clone(), clock.clone())),
            Box::new(ApplicationProbe::new(application.clone(), clock.clone())),
        ];

        let collector = Arc::new(MetricsCollector::from_config(&config, probes, clock.clone()));
        let alerts = Arc::new(AlertManager::from_config(&config, collector.clone(), clock.clone())?);
        let health = Arc::new(HealthChecker::from_config(&config, sampler, clock.clone())?);

        Ok(Self::with_components(config, collector, alerts, health, clock)
            .with_application_metrics(application))
    }

    /// Assemble an orchestrator from prebuilt components
    pub fn with_components(
        config: MonitoringConfig,
        collector: Arc<MetricsCollector>,
        alerts: Arc<AlertManager>,
        health: Arc<HealthChecker>,
        clock: SharedClock,
    ) -> Self {
        let logs = LogAnalyzer::new(&config.log_dir).with_clock(clock.clone());

        Self {
            config,
            collector,
            alerts,
            health,
            logs,
            application: None,
            clock,
            lifecycle: Mutex::new(None),
        }
    }

    /// Registry handed out by [`Self::application_metrics`]
    pub fn with_application_metrics(mut self, metrics: ApplicationMetrics) -> Self {
        self.application = Some(metrics);
        self
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    /// Registry the host application records into
    pub fn application_metrics(&self) -> Option<&ApplicationMetrics> {
        self.application.as_ref()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Option<Lifecycle>> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the three loops; a no-op while already running
    ///
    /// Also a no-op while loops of a timed-out [`Self::stop`] are still
    /// finishing. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = self.lifecycle();
        match lifecycle.as_ref() {
            Some(Lifecycle::Running { .. }) => {
                warn!("monitoring is already active");
                return;
            }
            Some(Lifecycle::Stopping(tracker)) if !tracker.is_empty() => {
                warn!(
                    "{} monitoring task(s) from the previous run still active, not starting",
                    tracker.len()
                );
                return;
            }
            _ => {}
        }

        info!("starting monitoring system");

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(self.collector.clone().run(cancel.child_token()));
        tracker.spawn(self.alerts.clone().run(cancel.child_token()));
        tracker.spawn(self.health.clone().run(cancel.child_token()));
        tracker.close();

        *lifecycle = Some(Lifecycle::Running { cancel, tracker });
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Some(Lifecycle::Running { .. }))
    }

    /// Cancel the loops and wait up to `stop_timeout` for them to settle
    ///
    /// Returns whether every loop finished in time. Loops that outlive the
    /// timeout keep the orchestrator in a stopping state until they return;
    /// calling `stop` again waits for them once more. Safe to call when not
    /// running.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> bool {
        let tracker = {
            let mut lifecycle = self.lifecycle();
            let tracker = match lifecycle.take() {
                None => {
                    debug!("monitoring is not running");
                    return true;
                }
                Some(Lifecycle::Running { cancel, tracker }) => {
                    cancel.cancel();
                    tracker
                }
                Some(Lifecycle::Stopping(tracker)) => tracker,
            };
            *lifecycle = Some(Lifecycle::Stopping(tracker.clone()));
            tracker
        };

        let timeout = self.config.stop_timeout();
        let settled = tokio::select! {
            _ = tracker.wait() => true,
            _ = tokio::time::sleep(timeout) => false,
        };

        if !settled {
            warn!("{} monitoring task(s) still active after {timeout:?}", tracker.len());
            return false;
        }

        let mut lifecycle = self.lifecycle();
        if let Some(Lifecycle::Stopping(tracker)) = lifecycle.as_ref()
            && tracker.is_empty()
        {
            *lifecycle = None;
        }

        info!("monitoring system stopped");
        true
    }

    /// Assemble the combined report
    ///
    /// Exports the metric buffer to the configured path; nothing else is
    /// written. Fails only if the export fails.
    #[instrument(skip(self))]
    pub async fn generate_report(&self) -> MonitoringResult<MonitoringReport> {
        info!("generating monitoring report");

        let window = self.config.health_summary_window();

        let alert_summary = self.alerts.get_summary();

        let health_summary = match self.health.get_summary(window) {
            Ok(summary) => HealthReport::Summary(summary),
            Err(e) => HealthReport::Unavailable {
                error: e.to_string(),
            },
        };

        let log_analysis = match self.logs.analyze(window).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("log analysis failed: {e}");
                LogAnalysis::default()
            }
        };

        let export_path = self.config.metrics_export_path.clone();
        let exported = self.collector.export(&export_path).await?;
        debug!("exported {exported} metric points");

        let recommendations =
            recommendations(&alert_summary, health_summary.summary(), &log_analysis);

        Ok(MonitoringReport {
            report_generated_at: self.clock.now(),
            monitoring_period: format!("Last {} hours", window.as_secs() / 3600),
            system_status: SystemStatus {
                overall_health: health_summary
                    .summary()
                    .map_or_else(|| "unknown".to_string(), |s| s.current_status.to_string()),
                uptime_percentage: health_summary.summary().map(|s| s.uptime_percentage),
                active_alerts: alert_summary.active_alerts,
                monitoring_active: self.is_running(),
            },
            metrics_summary: MetricsSummary {
                total_metrics_collected: exported,
                collection_interval_secs: self.collector.interval().as_secs(),
                metrics_exported_to: export_path,
            },
            alert_summary,
            health_summary,
            log_analysis,
            recommendations,
        })
    }

    /// Write a report as pretty JSON
    pub async fn write_report(
        &self,
        report: &MonitoringReport,
        path: impl AsRef<Path>,
    ) -> MonitoringResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(report)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MonitoringError::export(path, e))?;
        }

        tokio::fs::write(path, json)
            .await
            .map_err(|e| MonitoringError::export(path, e))?;

        info!("monitoring report saved to {}", path.display());
        Ok(())
    }
}
