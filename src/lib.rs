pub mod alerts;
pub mod clock;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod logs;
pub mod orchestrator;
pub mod probes;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{MonitoringError, MonitoringResult};

/// One observation of a named metric
///
/// Points are immutable once built. Many points share a name over time; the
/// collector keeps them in insertion order. The serialized form is the flat
/// export record (`timestamp`, `metric_name`, `value`, `labels`, `unit`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "metric_name")]
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub unit: String,
}

impl MetricPoint {
    /// Create a point stamped with the current wall clock time
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            name: name.into(),
            value,
            labels: BTreeMap::new(),
            unit: String::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}
