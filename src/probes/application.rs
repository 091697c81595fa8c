//! Application-level metrics
//!
//! The serving application records into an [`ApplicationMetrics`] registry as
//! requests come in. The registry is a plain `prometheus` registry, so the
//! host can also expose it in the text format. [`ApplicationProbe`] gathers it
//! on every collection tick and turns the families into metric points.
//!
//! Counters (`http_requests_total`, `quiz_generation_requests`) are reported
//! cumulatively. Request durations and errors are reported per interval: the
//! probe keeps the values of the previous gather and emits the difference.
//! `application_errors_total` is a single unlabelled point with the errors of
//! the interval across all types; the per-type split goes to
//! `application_errors_by_type`.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::proto::Metric;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, exponential_buckets,
};

use super::MetricProbe;
use crate::{
    MetricPoint,
    clock::{SharedClock, system_clock},
    error::MonitoringResult,
};

const REQUESTS: &str = "http_requests_total";
const REQUEST_DURATION: &str = "http_request_duration_seconds";
const GENERATIONS: &str = "quiz_generation_requests";
const CONNECTIONS: &str = "database_connections_active";
const ERRORS: &str = "application_errors_total";
const ERRORS_BY_TYPE: &str = "application_errors_by_type";

type Labels = BTreeMap<String, String>;

/// Shared registry the application writes into
///
/// Cloning is cheap; all clones write into the same registry.
#[derive(Clone)]
pub struct ApplicationMetrics {
    registry: Registry,
    requests: IntCounterVec,
    request_duration: HistogramVec,
    generations: IntCounterVec,
    connections: IntGaugeVec,
    errors: IntCounterVec,
}

impl ApplicationMetrics {
    pub fn new() -> MonitoringResult<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new(REQUESTS, "Total number of HTTP requests served"),
            &["method", "endpoint", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(REQUEST_DURATION, "Duration of HTTP requests in seconds")
                .buckets(exponential_buckets(0.005, 2.0, 12)?),
            &["method", "endpoint"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let generations = IntCounterVec::new(
            Opts::new(GENERATIONS, "Total number of quiz generation requests"),
            &["difficulty", "status"],
        )?;
        registry.register(Box::new(generations.clone()))?;

        let connections = IntGaugeVec::new(
            Opts::new(CONNECTIONS, "Number of active database connections"),
            &["database"],
        )?;
        registry.register(Box::new(connections.clone()))?;

        let errors = IntCounterVec::new(
            Opts::new(ERRORS, "Total number of application errors"),
            &["error_type"],
        )?;
        registry.register(Box::new(errors.clone()))?;

        Ok(Self {
            registry,
            requests,
            request_duration,
            generations,
            connections,
            errors,
        })
    }

    /// The underlying registry, e.g. for a text-format `/metrics` endpoint
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        let status = status.to_string();

        self.requests
            .with_label_values(&[method, endpoint, status.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    pub fn record_generation(&self, difficulty: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.generations
            .with_label_values(&[difficulty, status])
            .inc();
    }

    pub fn set_active_connections(&self, database: &str, active: u64) {
        self.connections
            .with_label_values(&[database])
            .set(i64::try_from(active).unwrap_or(i64::MAX));
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors.with_label_values(&[error_type]).inc();
    }
}

/// Values seen at the previous gather
#[derive(Debug, Default)]
struct Baseline {
    /// labels -> (sum of seconds, request count)
    durations: BTreeMap<Labels, (f64, u64)>,
    /// error type -> errors
    errors: BTreeMap<String, u64>,
}

fn label_map(metric: &Metric) -> Labels {
    metric
        .get_label()
        .iter()
        .map(|pair| (pair.get_name().to_string(), pair.get_value().to_string()))
        .collect()
}

fn point(name: &str, value: f64, timestamp: DateTime<Utc>, labels: &Labels) -> MetricPoint {
    labels
        .iter()
        .fold(MetricPoint::new(name, value).at(timestamp), |point, (key, value)| {
            point.with_label(key.as_str(), value.as_str())
        })
}

/// Probe gathering an [`ApplicationMetrics`] registry
pub struct ApplicationProbe {
    metrics: ApplicationMetrics,
    clock: SharedClock,
    baseline: Mutex<Baseline>,
}

impl ApplicationProbe {
    pub fn new(metrics: ApplicationMetrics, clock: SharedClock) -> Self {
        Self {
            metrics,
            clock,
            baseline: Mutex::new(Baseline::default()),
        }
    }

    pub fn with_system_clock(metrics: ApplicationMetrics) -> Self {
        Self::new(metrics, system_clock())
    }
}

#[async_trait]
impl MetricProbe for ApplicationProbe {
    fn name(&self) -> &str {
        "application"
    }

    async fn collect(&self) -> MonitoringResult<Vec<MetricPoint>> {
        let timestamp = self.clock.now();
        let families = self.metrics.registry.gather();

        let mut baseline = self.baseline.lock().unwrap_or_else(PoisonError::into_inner);
        let mut points = Vec::new();
        let mut interval_errors = 0;

        for family in &families {
            for metric in family.get_metric() {
                let labels = label_map(metric);

                match family.get_name() {
                    REQUESTS => points.push(
                        point(REQUESTS, metric.get_counter().value(), timestamp, &labels)
                            .with_unit("requests"),
                    ),
                    GENERATIONS => points.push(
                        point(GENERATIONS, metric.get_counter().value(), timestamp, &labels)
                            .with_unit("requests"),
                    ),
                    CONNECTIONS => points.push(
                        point(CONNECTIONS, metric.get_gauge().value(), timestamp, &labels)
                            .with_unit("connections"),
                    ),
                    REQUEST_DURATION => {
                        let histogram = metric.get_histogram();
                        let (sum, count) = (histogram.get_sample_sum(), histogram.get_sample_count());
                        let (last_sum, last_count) = baseline
                            .durations
                            .get(&labels)
                            .copied()
                            .unwrap_or_default();

                        let observed = count.saturating_sub(last_count);
                        if observed > 0 {
                            let mean = (sum - last_sum) / observed as f64;
                            points.push(
                                point(REQUEST_DURATION, mean, timestamp, &labels).with_unit("seconds"),
                            );
                        }
                        baseline.durations.insert(labels, (sum, count));
                    }
                    ERRORS => {
                        let error_type = labels.get("error_type").cloned().unwrap_or_default();
                        let total = metric.get_counter().value() as u64;
                        let last = baseline
                            .errors
                            .insert(error_type, total)
                            .unwrap_or_default();

                        let errors = total.saturating_sub(last);
                        interval_errors += errors;
                        points.push(
                            point(ERRORS_BY_TYPE, errors as f64, timestamp, &labels)
                                .with_unit("errors"),
                        );
                    }
                    _ => {}
                }
            }
        }

        points.push(
            MetricPoint::new(ERRORS, interval_errors as f64)
                .at(timestamp)
                .with_unit("errors"),
        );

        Ok(points)
    }
}
