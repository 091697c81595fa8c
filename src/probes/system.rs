//! Local machine resources via `sysinfo`

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sysinfo::{Disks, Networks, System};
use tracing::{instrument, trace};

use super::MetricProbe;
use crate::{
    MetricPoint,
    clock::{SharedClock, system_clock},
    error::{MonitoringError, MonitoringResult},
};

/// One reading of the machine's resource usage
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReading {
    pub host: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_available_bytes: u64,
    pub disk_percent: f64,
    /// Mount point the disk figure refers to (`/`, or `*` when aggregated)
    pub disk_mount: String,
    pub network_bytes_sent: u64,
    pub network_bytes_recv: u64,
}

/// Blocking source of [`ResourceReading`]s
///
/// Implementations may block (sysinfo sleeps between CPU refreshes), so async
/// callers run them through `spawn_blocking`.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> MonitoringResult<ResourceReading>;
}

/// [`ResourceSampler`] reading the local machine
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self) -> MonitoringResult<ResourceReading> {
        let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);

        // cpu usage is a delta between two refreshes
        sys.refresh_cpu_usage();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        if total_memory == 0 {
            return Err(MonitoringError::probe("system", "memory information unavailable"));
        }

        let memory_percent = sys.used_memory() as f64 / total_memory as f64 * 100.0;

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .iter()
            .find(|disk| disk.mount_point() == std::path::Path::new("/"));

        let (disk_total, disk_available, disk_mount) = match root {
            Some(disk) => (disk.total_space(), disk.available_space(), "/".to_string()),
            None => disks.iter().fold((0, 0, "*".to_string()), |acc, disk| {
                (acc.0 + disk.total_space(), acc.1 + disk.available_space(), acc.2)
            }),
        };

        let disk_percent = if disk_total > 0 {
            disk_total.saturating_sub(disk_available) as f64 / disk_total as f64 * 100.0
        } else {
            0.0
        };

        let networks = Networks::new_with_refreshed_list();
        let (network_bytes_sent, network_bytes_recv) =
            networks.iter().fold((0u64, 0u64), |acc, (_, data)| {
                (acc.0 + data.total_transmitted(), acc.1 + data.total_received())
            });

        Ok(ResourceReading {
            host: System::host_name().unwrap_or_else(|| "localhost".to_string()),
            cpu_percent: f64::from(sys.global_cpu_usage()),
            memory_percent,
            memory_available_bytes: sys.available_memory(),
            disk_percent,
            disk_mount,
            network_bytes_sent,
            network_bytes_recv,
        })
    }
}

/// Run a sampler off the async runtime
pub async fn sample_blocking(sampler: Arc<dyn ResourceSampler>) -> MonitoringResult<ResourceReading> {
    tokio::task::spawn_blocking(move || sampler.sample())
        .await
        .map_err(|e| MonitoringError::probe("system", format!("sampler task failed: {e}")))?
}

/// System-resource probe: CPU, memory, disk and network readings
pub struct SystemProbe {
    sampler: Arc<dyn ResourceSampler>,
    clock: SharedClock,
}

impl SystemProbe {
    pub fn new(sampler: Arc<dyn ResourceSampler>, clock: SharedClock) -> Self {
        Self { sampler, clock }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new(Arc::new(SysinfoSampler::new()), system_clock())
    }
}

#[async_trait]
impl MetricProbe for SystemProbe {
    fn name(&self) -> &str {
        "system"
    }

    #[instrument(skip(self))]
    async fn collect(&self) -> MonitoringResult<Vec<MetricPoint>> {
        let reading = sample_blocking(self.sampler.clone()).await?;
        trace!("system reading: {reading:?}");

        Ok(reading_to_points(&reading, self.clock.now()))
    }
}

fn reading_to_points(
    reading: &ResourceReading,
    timestamp: chrono::DateTime<chrono::Utc>,
) -> Vec<MetricPoint> {
    let point = |name: &str, value: f64, unit: &str| {
        MetricPoint::new(name, value)
            .at(timestamp)
            .with_label("host", reading.host.as_str())
            .with_unit(unit)
    };

    vec![
        point("system_cpu_usage_percent", reading.cpu_percent, "percent"),
        point("system_memory_usage_percent", reading.memory_percent, "percent"),
        point(
            "system_memory_available_bytes",
            reading.memory_available_bytes as f64,
            "bytes",
        ),
        point("system_disk_usage_percent", reading.disk_percent, "percent")
            .with_label("mount", reading.disk_mount.as_str()),
        point(
            "system_network_bytes_sent",
            reading.network_bytes_sent as f64,
            "bytes",
        ),
        point(
            "system_network_bytes_recv",
            reading.network_bytes_recv as f64,
            "bytes",
        ),
    ]
}
