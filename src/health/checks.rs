//! The sub-check battery: API reachability, resource limits and dependency
//! reachability (TCP services and the SQLite database file)

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{instrument, trace, warn};

use crate::{
    config::{DependencyConfig, DependencyTarget, EndpointConfig, ResourceLimits},
    error::{MonitoringError, MonitoringResult},
    probes::{ResourceSampler, system::sample_blocking},
};

/// Result of one named pass/fail check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub response_time: Option<Duration>,
    pub error: Option<String>,
}

impl CheckOutcome {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            response_time: None,
            error: None,
        }
    }

    pub fn fail(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            response_time: None,
            error: Some(error.into()),
        }
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = Some(response_time);
        self
    }
}

/// One member of the health battery
///
/// A check may report several outcomes (one per endpoint, one per resource).
/// Returning `Err` marks the whole check as a single failed entry under
/// [`HealthCheck::name`].
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> MonitoringResult<Vec<CheckOutcome>>;
}

/// Probes HTTP endpoints below a base URL
///
/// Each endpoint yields an `api<path>` outcome that passes when the response
/// status matches the expected one. The per-endpoint timeout is a hard bound.
pub struct ApiHealthCheck {
    client: Client,
    base_url: String,
    endpoints: Vec<EndpointConfig>,
}

impl ApiHealthCheck {
    pub fn new(base_url: impl Into<String>, endpoints: Vec<EndpointConfig>) -> MonitoringResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| MonitoringError::InvalidConfig(format!("health check client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints,
        })
    }

    async fn check_endpoint(&self, endpoint: &EndpointConfig) -> CheckOutcome {
        let name = format!("api{}", endpoint.path);
        let url = format!("{}{}", self.base_url, endpoint.path);
        trace!("checking {url}");

        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .timeout(endpoint.timeout())
            .send()
            .await;
        let elapsed = start.elapsed();

        match response {
            Ok(response) if response.status().as_u16() == endpoint.expected_status => {
                CheckOutcome::pass(name).with_response_time(elapsed)
            }
            Ok(response) => CheckOutcome::fail(
                name,
                format!(
                    "API health check failed for {}: unexpected status {}",
                    endpoint.path,
                    response.status()
                ),
            )
            .with_response_time(elapsed),
            Err(e) => {
                warn!("request to {url} failed: {e}");
                CheckOutcome::fail(
                    name,
                    format!("API health check failed for {}: {e}", endpoint.path),
                )
            }
        }
    }
}

#[async_trait]
impl HealthCheck for ApiHealthCheck {
    fn name(&self) -> &str {
        "api"
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn run(&self) -> MonitoringResult<Vec<CheckOutcome>> {
        let checks = self.endpoints.iter().map(|e| self.check_endpoint(e));
        Ok(futures::future::join_all(checks).await)
    }
}

/// Compares current resource usage against upper bounds
pub struct ResourceHealthCheck {
    sampler: Arc<dyn ResourceSampler>,
    limits: ResourceLimits,
}

impl ResourceHealthCheck {
    pub fn new(sampler: Arc<dyn ResourceSampler>, limits: ResourceLimits) -> Self {
        Self { sampler, limits }
    }
}

fn below_limit(name: &str, label: &str, value: f64, limit: f64) -> CheckOutcome {
    if value < limit {
        CheckOutcome::pass(name)
    } else {
        CheckOutcome::fail(name, format!("{label} usage {value:.1}% exceeds {limit}%"))
    }
}

#[async_trait]
impl HealthCheck for ResourceHealthCheck {
    fn name(&self) -> &str {
        "system_resources"
    }

    async fn run(&self) -> MonitoringResult<Vec<CheckOutcome>> {
        let start = Instant::now();
        let reading = sample_blocking(self.sampler.clone()).await?;
        let elapsed = start.elapsed();

        Ok(vec![
            below_limit("system_cpu", "CPU", reading.cpu_percent, self.limits.cpu_percent)
                .with_response_time(elapsed),
            below_limit(
                "system_memory",
                "Memory",
                reading.memory_percent,
                self.limits.memory_percent,
            ),
            below_limit(
                "system_disk",
                "Disk",
                reading.disk_percent,
                self.limits.disk_percent,
            ),
        ])
    }
}

/// First bytes of every non-empty SQLite database file
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

async fn open_sqlite(path: &Path) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await?;

    let mut header = [0u8; 16];
    let read = file.read(&mut header).await?;

    // an empty file is a database nothing has been written to yet
    if header[..read] != SQLITE_HEADER[..read] {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "not a SQLite database",
        ));
    }

    Ok(())
}

/// Reachability of an external dependency, e.g. the database
///
/// TCP targets must accept a connection; SQLite targets must open for
/// reading and writing and carry the SQLite header.
pub struct DependencyHealthCheck {
    name: String,
    target: DependencyTarget,
    timeout: Duration,
}

impl DependencyHealthCheck {
    pub fn new(config: &DependencyConfig) -> Self {
        Self {
            name: format!("{}_connection", config.name),
            target: config.target.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl HealthCheck for DependencyHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(target = %self.target))]
    async fn run(&self) -> MonitoringResult<Vec<CheckOutcome>> {
        let start = Instant::now();

        let connect = async {
            match &self.target {
                DependencyTarget::Tcp { address } => TcpStream::connect(address).await.map(drop),
                DependencyTarget::Sqlite { path } => open_sqlite(path).await,
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(())) => CheckOutcome::pass(&self.name).with_response_time(start.elapsed()),
            Ok(Err(e)) => CheckOutcome::fail(
                &self.name,
                format!("Connection to {} failed: {e}", self.target),
            ),
            Err(_) => CheckOutcome::fail(
                &self.name,
                format!("Connection to {} timed out after {:?}", self.target, self.timeout),
            ),
        };

        Ok(vec![outcome])
    }
}
