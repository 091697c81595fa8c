//! Pluggable metric sources
//!
//! The collector only knows the [`MetricProbe`] trait. The host supplies the
//! concrete sources: [`system::SystemProbe`] reads the local machine through
//! `sysinfo`, [`application::ApplicationProbe`] gathers the `prometheus`
//! registry the application updates while serving requests, and [`FnProbe`]
//! wraps any closure (handy for tests and ad-hoc sources).

pub mod application;
pub mod system;

use async_trait::async_trait;

use crate::{MetricPoint, error::MonitoringResult};

pub use application::{ApplicationMetrics, ApplicationProbe};
pub use system::{ResourceReading, ResourceSampler, SysinfoSampler, SystemProbe};

/// A source of metric points
///
/// A failing probe only costs its own points for that tick; the collector
/// logs the error and keeps going.
#[async_trait]
pub trait MetricProbe: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> &str;

    async fn collect(&self) -> MonitoringResult<Vec<MetricPoint>>;
}

/// Probe backed by a plain closure
pub struct FnProbe<F> {
    name: String,
    f: F,
}

impl<F> FnProbe<F>
where
    F: Fn() -> MonitoringResult<Vec<MetricPoint>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> MetricProbe for FnProbe<F>
where
    F: Fn() -> MonitoringResult<Vec<MetricPoint>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> MonitoringResult<Vec<MetricPoint>> {
        (self.f)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitoringError;

    #[tokio::test]
    async fn test_fn_probe() {
        let probe = FnProbe::new("static", || Ok(vec![MetricPoint::new("answer", 42.0)]));

        assert_eq!(probe.name(), "static");
        let points = probe.collect().await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 42.0);
    }

    #[tokio::test]
    async fn test_fn_probe_error() {
        let probe = FnProbe::new("broken", || Err(MonitoringError::probe("broken", "boom")));
        assert!(probe.collect().await.is_err());
    }
}
