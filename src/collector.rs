//! MetricsCollector - Buffers metric points pulled from probes
//!
//! ## Buffer
//!
//! Points are appended in the order they are observed, which is not
//! necessarily chronological when probes race. The buffer is capped at
//! `max_points`; once full, the oldest points are evicted first.
//!
//! Readers (`query`, `snapshot`, `export`) copy what they need under a short
//! read lock, so an append never invalidates an in-progress read.
//!
//! ## Collection Loop
//!
//! ```text
//! probes (in order) → record → sleep(interval | backoff) → ...
//!                                   ↑
//!                                   └─── cancellation (only observed here)
//! ```
//!
//! A failing probe is logged and the loop sleeps for the shorter backoff
//! instead of the full interval before trying again.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    MetricPoint,
    clock::SharedClock,
    config::MonitoringConfig,
    error::{MonitoringError, MonitoringResult},
    probes::MetricProbe,
};

/// Default maximum number of buffered points
pub const DEFAULT_MAX_POINTS: usize = 100_000;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Result of a single collection tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Points appended to the buffer
    pub recorded: usize,

    /// Names of the probes that failed
    pub failed_probes: Vec<String>,
}

impl CollectionOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_probes.is_empty()
    }
}

pub struct MetricsCollector {
    buffer: RwLock<VecDeque<MetricPoint>>,
    max_points: usize,
    probes: Vec<Box<dyn MetricProbe>>,
    clock: SharedClock,
    interval: Duration,
    backoff: Duration,
}

impl MetricsCollector {
    /// Create a collector that polls `probes` in the given order
    pub fn new(probes: Vec<Box<dyn MetricProbe>>, clock: SharedClock) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::new()),
            max_points: DEFAULT_MAX_POINTS,
            probes,
            clock,
            interval: DEFAULT_INTERVAL,
            backoff: DEFAULT_BACKOFF,
        }
    }

    pub fn from_config(
        config: &MonitoringConfig,
        probes: Vec<Box<dyn MetricProbe>>,
        clock: SharedClock,
    ) -> Self {
        Self::new(probes, clock)
            .with_interval(config.collection_interval())
            .with_backoff(config.collection_backoff())
            .with_max_points(config.max_buffer_points)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Append points to the buffer
    pub fn record(&self, points: impl IntoIterator<Item = MetricPoint>) {
        let mut buffer = self.buffer.write().unwrap_or_else(PoisonError::into_inner);
        buffer.extend(points);

        let overflow = buffer.len().saturating_sub(self.max_points);
        if overflow > 0 {
            buffer.drain(..overflow);
            debug!("evicted {overflow} oldest metric points");
        }
    }

    /// Points named `name` observed within `window` of now, in insertion order
    ///
    /// A point is inside the window when `now - window < timestamp <= now`.
    pub fn query(&self, name: &str, window: Duration) -> Vec<MetricPoint> {
        let now = self.clock.now();
        let cutoff = window_start(now, window);

        let buffer = self.buffer.read().unwrap_or_else(PoisonError::into_inner);
        buffer
            .iter()
            .filter(|point| point.name == name && point.timestamp > cutoff && point.timestamp <= now)
            .cloned()
            .collect()
    }

    /// Copy of the whole buffer
    pub fn snapshot(&self) -> Vec<MetricPoint> {
        let buffer = self.buffer.read().unwrap_or_else(PoisonError::into_inner);
        buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the whole buffer as a JSON array of flat metric records
    ///
    /// Only the copy is taken under the lock; the write happens afterwards,
    /// so collection is never blocked on disk I/O.
    #[instrument(skip_all)]
    pub async fn export(&self, path: impl AsRef<Path>) -> MonitoringResult<usize> {
        let path = path.as_ref();
        let points = self.snapshot();
        let payload = serde_json::to_vec_pretty(&points)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MonitoringError::export(path, e))?;
        }

        tokio::fs::write(path, payload)
            .await
            .map_err(|e| MonitoringError::export(path, e))?;

        info!("exported {} metrics to {}", points.len(), path.display());
        Ok(points.len())
    }

    /// Run every probe once, in order, and record what they return
    pub async fn collect_once(&self) -> CollectionOutcome {
        let mut outcome = CollectionOutcome::default();

        for probe in &self.probes {
            match probe.collect().await {
                Ok(points) => {
                    trace!("probe `{}` returned {} points", probe.name(), points.len());
                    outcome.recorded += points.len();
                    self.record(points);
                }
                Err(e) => {
                    error!("error collecting metrics from `{}`: {e}", probe.name());
                    outcome.failed_probes.push(probe.name().to_string());
                }
            }
        }

        outcome
    }

    /// Collection loop, runs until `cancel` fires
    ///
    /// Cancellation is only observed while sleeping between ticks, so a tick
    /// that has started always finishes.
    #[instrument(skip_all)]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("starting metrics collection");

        while !cancel.is_cancelled() {
            let outcome = self.collect_once().await;

            let pause = if outcome.is_success() {
                self.interval
            } else {
                warn!(
                    "{} probe(s) failed, retrying in {:?}",
                    outcome.failed_probes.len(),
                    self.backoff
                );
                self.backoff
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("stopping metrics collection");
    }
}

/// Start of a look-back window, saturating at the earliest representable time
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
