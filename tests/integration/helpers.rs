//! Helper functions for integration tests

use std::sync::Arc;

use async_trait::async_trait;
use quiz_monitoring::{
    MetricPoint, MonitoringError, MonitoringResult,
    alerts::{AlertManager, AlertRecord, ChannelSink},
    clock::{Clock, ManualClock},
    collector::MetricsCollector,
    config::{AlertRule, Condition, Severity},
    health::{CheckOutcome, HealthCheck},
    probes::{ResourceReading, ResourceSampler},
};
use tokio::sync::mpsc;

pub fn rule(name: &str, metric: &str, condition: Condition, threshold: f64) -> AlertRule {
    AlertRule {
        name: name.to_string(),
        metric: metric.to_string(),
        condition,
        threshold,
        duration_secs: 300,
        severity: Severity::Warning,
        description: format!("{metric} {condition} {threshold}"),
    }
}

/// Collector, alert engine and a receiver for its notifications, sharing one
/// manual clock
pub struct AlertPipeline {
    pub clock: Arc<ManualClock>,
    pub collector: Arc<MetricsCollector>,
    pub manager: AlertManager,
    pub notifications: mpsc::UnboundedReceiver<AlertRecord>,
}

impl AlertPipeline {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let collector = Arc::new(MetricsCollector::new(Vec::new(), clock.clone()));
        let (sink, notifications) = ChannelSink::new();

        let mut manager = AlertManager::new(collector.clone(), Arc::new(sink), clock.clone());
        for rule in rules {
            manager.add_rule(rule);
        }

        Self {
            clock,
            collector,
            manager,
            notifications,
        }
    }

    /// Record a value stamped with the current manual time
    pub fn feed(&self, metric: &str, value: f64) {
        self.collector
            .record([MetricPoint::new(metric, value).at(self.clock.now())]);
    }

    /// Move time past every rule window so earlier points stop counting
    pub fn skip_window(&self) {
        self.clock.advance(chrono::Duration::seconds(301));
    }

    pub fn drain_notifications(&mut self) -> Vec<AlertRecord> {
        let mut received = Vec::new();
        while let Ok(record) = self.notifications.try_recv() {
            received.push(record);
        }
        received
    }
}

pub struct FixedSampler(pub ResourceReading);

impl ResourceSampler for FixedSampler {
    fn sample(&self) -> MonitoringResult<ResourceReading> {
        Ok(self.0.clone())
    }
}

pub fn reading(cpu: f64, memory: f64, disk: f64) -> ResourceReading {
    ResourceReading {
        host: "integration".to_string(),
        cpu_percent: cpu,
        memory_percent: memory,
        memory_available_bytes: 4 * 1024 * 1024 * 1024,
        disk_percent: disk,
        disk_mount: "/".to_string(),
        network_bytes_sent: 0,
        network_bytes_recv: 0,
    }
}

/// Check that always errors out
pub struct BrokenCheck(pub &'static str);

#[async_trait]
impl HealthCheck for BrokenCheck {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self) -> MonitoringResult<Vec<CheckOutcome>> {
        Err(MonitoringError::probe(self.0, "probe crashed"))
    }
}

/// Check with a fixed pass/fail result
pub struct FixedCheck(pub &'static str, pub bool);

#[async_trait]
impl HealthCheck for FixedCheck {
    fn name(&self) -> &str {
        self.0
    }

    async fn run(&self) -> MonitoringResult<Vec<CheckOutcome>> {
        Ok(vec![if self.1 {
            CheckOutcome::pass(self.0)
        } else {
            CheckOutcome::fail(self.0, format!("{} failed", self.0))
        }])
    }
}
