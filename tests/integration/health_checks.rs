//! Health battery against mocked endpoints and fixed resource readings

use std::sync::Arc;

use quiz_monitoring::{
    clock::{ManualClock, system_clock},
    config::{DependencyConfig, DependencyTarget, EndpointConfig, MonitoringConfig},
    health::{HealthCheck, HealthChecker, HealthStatus},
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn mock_api(status: u16) -> MockServer {
    let mock_server = MockServer::start().await;

    for endpoint in ["/health", "/docs", "/openapi.json"] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock_server)
            .await;
    }

    mock_server
}

/// An empty database file, as SQLite leaves it before the first write
fn database_file(dir: &tempfile::TempDir) -> Vec<DependencyConfig> {
    let path = dir.path().join("quiz_app.db");
    std::fs::write(&path, b"").unwrap();
    vec![DependencyConfig::sqlite("database", path)]
}

#[tokio::test]
async fn test_configured_battery_healthy() {
    let mock_server = mock_api(200).await;
    let dir = tempfile::tempdir().unwrap();

    let config = MonitoringConfig {
        base_url: mock_server.uri(),
        dependencies: database_file(&dir),
        ..MonitoringConfig::default()
    };

    let checker = HealthChecker::from_config(
        &config,
        Arc::new(FixedSampler(reading(20.0, 40.0, 50.0))),
        system_clock(),
    )
    .unwrap();

    let snapshot = checker.check().await;

    assert_eq!(snapshot.overall_status, HealthStatus::Healthy);
    assert_eq!(
        snapshot.checks.keys().cloned().collect::<Vec<_>>(),
        vec![
            "api/docs",
            "api/health",
            "api/openapi.json",
            "database_connection",
            "system_cpu",
            "system_disk",
            "system_memory",
        ]
    );
    assert!(snapshot.response_times.contains_key("api/health"));
    assert!(snapshot.errors.is_empty());
}

#[tokio::test]
async fn test_api_down_is_unhealthy() {
    let mock_server = mock_api(503).await;
    let dir = tempfile::tempdir().unwrap();

    let config = MonitoringConfig {
        base_url: mock_server.uri(),
        dependencies: database_file(&dir),
        ..MonitoringConfig::default()
    };

    let checker = HealthChecker::from_config(
        &config,
        Arc::new(FixedSampler(reading(20.0, 40.0, 50.0))),
        system_clock(),
    )
    .unwrap();

    let snapshot = checker.check().await;

    assert_eq!(snapshot.failed_checks(), 3);
    assert_eq!(snapshot.overall_status, HealthStatus::Unhealthy);
    assert_eq!(snapshot.errors.len(), 3);
}

#[tokio::test]
async fn test_one_crashing_check_degrades() {
    let checks: Vec<Box<dyn HealthCheck>> = vec![
        Box::new(FixedCheck("api/health", true)),
        Box::new(BrokenCheck("system_resources")),
        Box::new(FixedCheck("database_connection", true)),
    ];
    let checker = HealthChecker::new(checks, Arc::new(ManualClock::default()));

    let snapshot = checker.check().await;

    assert_eq!(snapshot.overall_status, HealthStatus::Degraded);
    assert_eq!(snapshot.failed_checks(), 1);
    assert!(snapshot.checks["api/health"]);
    assert!(snapshot.checks["database_connection"]);
    assert!(!snapshot.checks["system_resources"]);
    assert_eq!(snapshot.errors.len(), 1);
}

#[tokio::test]
async fn test_unreachable_dependency_is_recorded() {
    let mock_server = mock_api(200).await;

    // bind then release a port so nothing listens there
    let address = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let config = MonitoringConfig {
        base_url: mock_server.uri(),
        api_endpoints: vec![EndpointConfig::new("/health")],
        dependencies: vec![DependencyConfig {
            timeout_secs: 1,
            ..DependencyConfig::tcp("database", address)
        }],
        ..MonitoringConfig::default()
    };

    let checker = HealthChecker::from_config(
        &config,
        Arc::new(FixedSampler(reading(20.0, 40.0, 50.0))),
        system_clock(),
    )
    .unwrap();

    let snapshot = checker.check().await;

    assert_eq!(snapshot.overall_status, HealthStatus::Degraded);
    assert!(!snapshot.checks["database_connection"]);
    assert!(snapshot.errors[0].contains("Connection to"));
}

#[tokio::test]
async fn test_default_battery_checks_the_database() {
    let mock_server = mock_api(200).await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = MonitoringConfig {
        base_url: mock_server.uri(),
        ..MonitoringConfig::default()
    };
    // keep the default dependency, only move its file into the sandbox
    config.dependencies[0].target = DependencyTarget::Sqlite {
        path: dir.path().join("quiz_app.db"),
    };

    let checker = HealthChecker::from_config(
        &config,
        Arc::new(FixedSampler(reading(20.0, 40.0, 50.0))),
        system_clock(),
    )
    .unwrap();

    let snapshot = checker.check().await;
    assert!(!snapshot.checks["database_connection"]);
    assert_eq!(snapshot.overall_status, HealthStatus::Degraded);

    std::fs::write(dir.path().join("quiz_app.db"), b"").unwrap();

    let snapshot = checker.check().await;
    assert!(snapshot.checks["database_connection"]);
    assert_eq!(snapshot.overall_status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_summary_uptime() {
    let clock = Arc::new(ManualClock::default());
    let checks: Vec<Box<dyn HealthCheck>> = vec![Box::new(FixedCheck("api/health", true))];
    let healthy = HealthChecker::new(checks, clock.clone());

    for _ in 0..3 {
        healthy.check().await;
        clock.advance(chrono::Duration::minutes(5));
    }

    let summary = healthy.get_summary(std::time::Duration::from_secs(24 * 3600)).unwrap();
    assert_eq!(summary.total_checks, 3);
    assert_eq!(summary.uptime_percentage, 100.0);
}
