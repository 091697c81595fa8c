use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{MonitoringError, MonitoringResult};

/// Top-level configuration for the monitoring hub
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Base address of the service whose API endpoints are probed
    pub base_url: String,

    pub collection_interval_secs: u64,

    /// Sleep used instead of the collection interval after a probe failure
    pub collection_backoff_secs: u64,

    pub evaluation_interval_secs: u64,

    pub health_interval_secs: u64,

    /// Upper bound on buffered metric points (oldest evicted first)
    pub max_buffer_points: usize,

    pub api_endpoints: Vec<EndpointConfig>,

    pub resource_limits: ResourceLimits,

    /// External dependencies checked on every health pass
    pub dependencies: Vec<DependencyConfig>,

    /// Overrides the default rule set when present
    pub alert_rules: Option<Vec<AlertRule>>,

    pub alert_log_path: PathBuf,

    pub notification_timeout_secs: u64,

    /// Deliver alert transitions to this webhook instead of the alert log
    pub webhook_url: Option<String>,

    pub metrics_export_path: PathBuf,

    pub report_path: PathBuf,

    /// Directory holding the log files inspected by the report
    pub log_dir: PathBuf,

    pub stop_timeout_secs: u64,

    pub health_summary_window_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("http://localhost:8000"),
            collection_interval_secs: 30,
            collection_backoff_secs: 5,
            evaluation_interval_secs: 60,
            health_interval_secs: 300,
            max_buffer_points: 100_000,
            api_endpoints: default_endpoints(),
            resource_limits: ResourceLimits::default(),
            dependencies: vec![DependencyConfig::sqlite("database", "quiz_app.db")],
            alert_rules: None,
            alert_log_path: PathBuf::from("logs/alerts.log"),
            notification_timeout_secs: 10,
            webhook_url: None,
            metrics_export_path: PathBuf::from("current_metrics.json"),
            report_path: PathBuf::from("monitoring_report.json"),
            log_dir: PathBuf::from("logs"),
            stop_timeout_secs: 10,
            health_summary_window_secs: 24 * 60 * 60,
        }
    }
}

impl MonitoringConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn collection_backoff(&self) -> Duration {
        Duration::from_secs(self.collection_backoff_secs)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn health_summary_window(&self) -> Duration {
        Duration::from_secs(self.health_summary_window_secs)
    }

    /// The configured rules, or the default rule set
    pub fn rules(&self) -> Vec<AlertRule> {
        self.alert_rules.clone().unwrap_or_else(default_alert_rules)
    }

    pub fn validate(&self) -> MonitoringResult<()> {
        if self.collection_interval_secs == 0
            || self.evaluation_interval_secs == 0
            || self.health_interval_secs == 0
        {
            return Err(MonitoringError::InvalidConfig(
                "loop intervals must be at least one second".to_string(),
            ));
        }

        if self.collection_backoff_secs == 0 {
            return Err(MonitoringError::InvalidConfig(
                "collection_backoff_secs must be at least one second".to_string(),
            ));
        }

        if self.notification_timeout_secs == 0 {
            return Err(MonitoringError::InvalidConfig(
                "notification_timeout_secs must be at least one second".to_string(),
            ));
        }

        if self.max_buffer_points == 0 {
            return Err(MonitoringError::InvalidConfig(
                "max_buffer_points must be positive".to_string(),
            ));
        }

        let mut names = std::collections::BTreeSet::new();
        for dependency in &self.dependencies {
            if !names.insert(dependency.name.as_str()) {
                return Err(MonitoringError::InvalidConfig(format!(
                    "dependency `{}` is configured twice",
                    dependency.name
                )));
            }
        }

        for rule in self.alert_rules.iter().flatten() {
            if !rule.threshold.is_finite() {
                return Err(MonitoringError::InvalidConfig(format!(
                    "rule `{}` has a non-finite threshold",
                    rule.name
                )));
            }
        }

        Ok(())
    }
}

/// One API endpoint probed by the health checker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_secs: u64,
}

impl EndpointConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_status: default_expected_status(),
            timeout_secs: default_endpoint_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_expected_status() -> u16 {
    200
}

fn default_endpoint_timeout() -> u64 {
    10
}

fn default_endpoints() -> Vec<EndpointConfig> {
    ["/health", "/docs", "/openapi.json"]
        .into_iter()
        .map(EndpointConfig::new)
        .collect()
}

/// Upper bounds (in percent) for the resource health checks
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 85.0,
            disk_percent: 90.0,
        }
    }
}

/// How a dependency is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DependencyTarget {
    /// `host:port` accepting TCP connections
    Tcp { address: String },
    /// SQLite database file that must open for reading and writing
    Sqlite { path: PathBuf },
}

impl fmt::Display for DependencyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyTarget::Tcp { address } => write!(f, "{address}"),
            DependencyTarget::Sqlite { path } => write!(f, "{}", path.display()),
        }
    }
}

/// An external dependency, recorded as `<name>_connection`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub name: String,
    #[serde(flatten)]
    pub target: DependencyTarget,
    #[serde(default = "default_dependency_timeout")]
    pub timeout_secs: u64,
}

impl DependencyConfig {
    pub fn tcp(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: DependencyTarget::Tcp {
                address: address.into(),
            },
            timeout_secs: default_dependency_timeout(),
        }
    }

    pub fn sqlite(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            target: DependencyTarget::Sqlite { path: path.into() },
            timeout_secs: default_dependency_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_dependency_timeout() -> u64 {
    5
}

/// Comparison applied between a rule's representative value and its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    GreaterThan,
    LessThan,
    /// Equal within [`Condition::EQ_EPSILON`]
    Equal,
}

impl Condition {
    pub const EQ_EPSILON: f64 = 0.01;

    pub fn is_met(self, value: f64, threshold: f64) -> bool {
        match self {
            Condition::GreaterThan => value > threshold,
            Condition::LessThan => value < threshold,
            Condition::Equal => (value - threshold).abs() < Self::EQ_EPSILON,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Condition::GreaterThan => "gt",
            Condition::LessThan => "lt",
            Condition::Equal => "eq",
        }
    }
}

impl FromStr for Condition {
    type Err = MonitoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" => Ok(Condition::GreaterThan),
            "lt" => Ok(Condition::LessThan),
            "eq" => Ok(Condition::Equal),
            other => Err(MonitoringError::InvalidConfig(format!(
                "unknown condition operator `{other}`"
            ))),
        }
    }
}

impl TryFrom<String> for Condition {
    type Error = MonitoringError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.as_str().to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => f.write_str("critical"),
            Severity::Warning => f.write_str("warning"),
            Severity::Info => f.write_str("info"),
        }
    }
}

/// Static alert rule
///
/// `duration` is the look-back window in seconds used to compute the
/// representative value; the engine never looks back less than a minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub name: String,
    pub metric: String,
    pub condition: Condition,
    pub threshold: f64,
    #[serde(rename = "duration")]
    pub duration_secs: u64,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
}

impl AlertRule {
    pub const MIN_WINDOW_SECS: u64 = 60;

    /// Look-back window used when evaluating this rule
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.duration_secs.max(Self::MIN_WINDOW_SECS))
    }
}

/// High/critical CPU, high memory and high application error rate
pub fn default_alert_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: String::from("High CPU Usage"),
            metric: String::from("system_cpu_usage_percent"),
            condition: Condition::GreaterThan,
            threshold: 80.0,
            duration_secs: 300,
            severity: Severity::Warning,
            description: String::from("CPU usage is above 80%"),
        },
        AlertRule {
            name: String::from("Critical CPU Usage"),
            metric: String::from("system_cpu_usage_percent"),
            condition: Condition::GreaterThan,
            threshold: 95.0,
            duration_secs: 60,
            severity: Severity::Critical,
            description: String::from("CPU usage is above 95%"),
        },
        AlertRule {
            name: String::from("High Memory Usage"),
            metric: String::from("system_memory_usage_percent"),
            condition: Condition::GreaterThan,
            threshold: 85.0,
            duration_secs: 300,
            severity: Severity::Warning,
            description: String::from("Memory usage is above 85%"),
        },
        AlertRule {
            name: String::from("High Error Rate"),
            metric: String::from("application_errors_total"),
            condition: Condition::GreaterThan,
            threshold: 10.0,
            duration_secs: 300,
            severity: Severity::Critical,
            description: String::from("Application error rate is too high"),
        },
    ]
}

pub fn read_config_file(path: impl AsRef<Path>) -> MonitoringResult<MonitoringConfig> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|e| {
        MonitoringError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
    })?;

    let config = parse_config(&file_content)?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

pub fn parse_config(content: &str) -> MonitoringResult<MonitoringConfig> {
    let config: MonitoringConfig = serde_json::from_str(content)
        .map_err(|e| MonitoringError::InvalidConfig(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
