//! Error types for the monitoring core
//!
//! Failures local to one probe, rule or health check are caught by the
//! component that owns them and only logged. The variants that reach a caller
//! are export/notification I/O failures and invalid configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for monitoring operations
pub type MonitoringResult<T> = Result<T, MonitoringError>;

/// Errors that can occur inside the monitoring core
#[derive(Debug, Error)]
pub enum MonitoringError {
    /// A single metric probe or health sub-check failed
    #[error("probe `{probe}` failed: {message}")]
    Probe { probe: String, message: String },

    /// Evaluation of one alert rule failed
    #[error("evaluation of rule `{rule}` failed: {message}")]
    Evaluation { rule: String, message: String },

    /// Persisting metrics or a report failed
    #[error("failed to write {}: {source}", path.display())]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serializing an export or report failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration (unknown operator, unreadable file, ...)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No health snapshots fall inside the requested window
    #[error("no health data available for the last {window_secs}s")]
    NoHealthData { window_secs: u64 },

    /// A notification sink could not deliver an alert record
    #[error("notification delivery failed: {0}")]
    Notification(String),

    /// Registering or reading an application metric failed
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
}

impl MonitoringError {
    pub fn probe(probe: impl Into<String>, message: impl ToString) -> Self {
        MonitoringError::Probe {
            probe: probe.into(),
            message: message.to_string(),
        }
    }

    pub fn evaluation(rule: impl Into<String>, message: impl ToString) -> Self {
        MonitoringError::Evaluation {
            rule: rule.into(),
            message: message.to_string(),
        }
    }

    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MonitoringError::Export {
            path: path.into(),
            source,
        }
    }
}
