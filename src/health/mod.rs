//! HealthChecker - Aggregates the health battery into one status
//!
//! Every [`HealthChecker::check`] runs all sub-checks concurrently, folds
//! their outcomes into a [`HealthSnapshot`] and appends it to a rolling
//! history of the last [`HISTORY_LIMIT`] snapshots.
//!
//! ## Status
//!
//! ```text
//! failed checks:  0 → healthy   1..=2 → degraded   3.. → unhealthy
//! ```
//!
//! A sub-check that errors out counts as one failed check under its own name,
//! and its error is recorded; the rest of the battery still runs.

pub mod checks;

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::SharedClock,
    collector::window_start,
    config::MonitoringConfig,
    error::{MonitoringError, MonitoringResult},
    probes::ResourceSampler,
};

pub use checks::{
    ApiHealthCheck, CheckOutcome, DependencyHealthCheck, HealthCheck, ResourceHealthCheck,
};

/// Maximum number of snapshots kept in history
pub const HISTORY_LIMIT: usize = 100;

/// Number of most recent snapshots whose errors appear in a summary
pub const SUMMARY_ERROR_SNAPSHOTS: usize = 5;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_failures(failed: usize) -> Self {
        match failed {
            0 => HealthStatus::Healthy,
            1 | 2 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Degraded => f.write_str("degraded"),
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// Result of one health-check cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub checks: BTreeMap<String, bool>,
    /// Seconds per check
    pub response_times: BTreeMap<String, f64>,
    pub errors: Vec<String>,
}

impl HealthSnapshot {
    pub fn failed_checks(&self) -> usize {
        self.checks.values().filter(|passed| !**passed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total_checks: usize,
    pub healthy_checks: usize,
    pub uptime_percentage: f64,
    pub current_status: HealthStatus,
    pub recent_errors: Vec<String>,
}

pub struct HealthChecker {
    checks: Vec<Box<dyn HealthCheck>>,
    history: Mutex<VecDeque<HealthSnapshot>>,
    clock: SharedClock,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(checks: Vec<Box<dyn HealthCheck>>, clock: SharedClock) -> Self {
        Self {
            checks,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            clock,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// The configured battery: API endpoints, resource limits, then dependencies
    pub fn from_config(
        config: &MonitoringConfig,
        sampler: Arc<dyn ResourceSampler>,
        clock: SharedClock,
    ) -> MonitoringResult<Self> {
        let mut checks: Vec<Box<dyn HealthCheck>> = vec![
            Box::new(ApiHealthCheck::new(
                &config.base_url,
                config.api_endpoints.clone(),
            )?),
            Box::new(ResourceHealthCheck::new(sampler, config.resource_limits)),
        ];

        checks.extend(
            config
                .dependencies
                .iter()
                .map(|dependency| Box::new(DependencyHealthCheck::new(dependency)) as Box<dyn HealthCheck>),
        );

        Ok(Self::new(checks, clock).with_interval(config.health_interval()))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn history_guard(&self) -> MutexGuard<'_, VecDeque<HealthSnapshot>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the whole battery once and record the snapshot
    #[instrument(skip(self))]
    pub async fn check(&self) -> HealthSnapshot {
        let runs = self.checks.iter().map(|check| async move {
            let start = Instant::now();
            let result = check.run().await;
            (check.name(), result, start.elapsed())
        });

        let results = futures::future::join_all(runs).await;

        let mut checks = BTreeMap::new();
        let mut response_times = BTreeMap::new();
        let mut errors = Vec::new();

        for (name, result, elapsed) in results {
            match result {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        if let Some(response_time) = outcome.response_time {
                            response_times.insert(outcome.name.clone(), response_time.as_secs_f64());
                        }
                        if let Some(error) = outcome.error {
                            errors.push(error);
                        }
                        // a name reported twice counts as failed if either failed
                        *checks.entry(outcome.name).or_insert(true) &= outcome.passed;
                    }
                }
                Err(e) => {
                    warn!("health check {name} failed: {e}");
                    checks.insert(name.to_string(), false);
                    response_times.insert(name.to_string(), elapsed.as_secs_f64());
                    errors.push(format!("{name} check failed: {e}"));
                }
            }
        }

        let failed = checks.values().filter(|passed| !**passed).count();
        let snapshot = HealthSnapshot {
            timestamp: self.clock.now(),
            overall_status: HealthStatus::from_failures(failed),
            checks,
            response_times,
            errors,
        };

        debug!(
            "health check finished: {} ({failed} failed)",
            snapshot.overall_status
        );

        let mut history = self.history_guard();
        history.push_back(snapshot.clone());
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }

        snapshot
    }

    pub fn history(&self) -> Vec<HealthSnapshot> {
        self.history_guard().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.history_guard().back().cloned()
    }

    /// Summarize the snapshots taken within `window`
    ///
    /// Errors with [`MonitoringError::NoHealthData`] when the window holds no
    /// snapshot.
    pub fn get_summary(&self, window: Duration) -> MonitoringResult<HealthSummary> {
        let now = self.clock.now();
        let cutoff = window_start(now, window);

        let history = self.history_guard();
        let recent: Vec<&HealthSnapshot> = history
            .iter()
            .filter(|snapshot| snapshot.timestamp > cutoff && snapshot.timestamp <= now)
            .collect();

        let Some(latest) = recent.last() else {
            return Err(MonitoringError::NoHealthData {
                window_secs: window.as_secs(),
            });
        };

        let total_checks = recent.len();
        let healthy_checks = recent
            .iter()
            .filter(|snapshot| snapshot.overall_status == HealthStatus::Healthy)
            .count();

        let mut recent_errors: Vec<String> = Vec::new();
        for snapshot in &recent[recent.len().saturating_sub(SUMMARY_ERROR_SNAPSHOTS)..] {
            for error in &snapshot.errors {
                if !recent_errors.contains(error) {
                    recent_errors.push(error.clone());
                }
            }
        }

        Ok(HealthSummary {
            total_checks,
            healthy_checks,
            uptime_percentage: healthy_checks as f64 / total_checks as f64 * 100.0,
            current_status: latest.overall_status,
            recent_errors,
        })
    }

    /// Health-check loop, runs until `cancel` fires
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("starting health checks every {:?}", self.interval);

        while !cancel.is_cancelled() {
            let snapshot = self.check().await;

            if snapshot.overall_status != HealthStatus::Healthy {
                warn!("system health: {}", snapshot.overall_status);
                for error in &snapshot.errors {
                    warn!("health check error: {error}");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("stopping health checks");
    }
}
