//! Orchestrator start/stop and reporting

use std::sync::Arc;
use std::time::Duration;

use quiz_monitoring::{
    MetricPoint,
    alerts::{AlertManager, FileSink},
    clock::system_clock,
    collector::MetricsCollector,
    config::{Condition, MonitoringConfig},
    health::{HealthCheck, HealthChecker},
    orchestrator::{HealthReport, MonitoringOrchestrator},
    probes::FnProbe,
};

use crate::helpers::*;

fn setup(dir: &std::path::Path, checks: Vec<Box<dyn HealthCheck>>) -> MonitoringOrchestrator {
    let config = MonitoringConfig {
        stop_timeout_secs: 2,
        metrics_export_path: dir.join("current_metrics.json"),
        report_path: dir.join("monitoring_report.json"),
        log_dir: dir.join("logs"),
        ..MonitoringConfig::default()
    };

    let clock = system_clock();
    let collector = Arc::new(
        MetricsCollector::new(
            vec![Box::new(FnProbe::new("cpu", || {
                Ok(vec![MetricPoint::new("system_cpu_usage_percent", 97.0)])
            }))],
            clock.clone(),
        )
        .with_interval(Duration::from_millis(10)),
    );

    let mut alerts = AlertManager::new(
        collector.clone(),
        Arc::new(FileSink::new(dir.join("logs").join("alerts.log"))),
        clock.clone(),
    )
    .with_interval(Duration::from_millis(10));
    alerts.add_rule(rule(
        "High CPU Usage",
        "system_cpu_usage_percent",
        Condition::GreaterThan,
        80.0,
    ));

    let health = HealthChecker::new(checks, clock.clone()).with_interval(Duration::from_millis(10));

    MonitoringOrchestrator::with_components(
        config,
        collector,
        Arc::new(alerts),
        Arc::new(health),
        clock,
    )
}

#[tokio::test]
async fn test_run_stop_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = setup(
        dir.path(),
        vec![
            Box::new(FixedCheck("api/health", true)),
            Box::new(BrokenCheck("database_connection")),
        ],
    );

    orchestrator.start();
    orchestrator.start();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(orchestrator.stop().await);
    assert!(!orchestrator.is_running());

    let report = orchestrator.generate_report().await.unwrap();

    assert!(!report.system_status.monitoring_active);
    assert_eq!(report.system_status.overall_health, "degraded");
    assert_eq!(report.system_status.uptime_percentage, Some(0.0));
    assert_eq!(report.system_status.active_alerts, 1);
    assert!(report.metrics_summary.total_metrics_collected > 0);

    let HealthReport::Summary(health) = &report.health_summary else {
        panic!("expected health data");
    };
    assert!(health.recent_errors[0].contains("probe crashed"));

    assert_eq!(
        report.recommendations,
        vec![
            "Address 1 active alerts immediately".to_string(),
            "Investigate system reliability issues (uptime: 0.00%)".to_string(),
        ]
    );

    orchestrator
        .write_report(&report, dir.path().join("monitoring_report.json"))
        .await
        .unwrap();

    let exported: Vec<serde_json::Value> = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("current_metrics.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(exported[0]["metric_name"], "system_cpu_usage_percent");

    let report_json: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("monitoring_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report_json["system_status"]["active_alerts"], 1);
    assert!(report_json["log_analysis"]["log_files_analyzed"].is_array());

    let alert_log = std::fs::read_to_string(dir.path().join("logs").join("alerts.log")).unwrap();
    assert_eq!(alert_log.matches("ALERT NOTIFICATION").count(), 1);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = setup(dir.path(), vec![Box::new(FixedCheck("api/health", true))]);

    orchestrator.start();
    assert!(orchestrator.stop().await);

    orchestrator.start();
    assert!(orchestrator.is_running());
    assert!(orchestrator.stop().await);
    assert!(orchestrator.stop().await);
}

#[tokio::test]
async fn test_export_failure_surfaces() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = setup(dir.path(), Vec::new());

    // a directory where the export file should be
    std::fs::create_dir_all(dir.path().join("current_metrics.json")).unwrap();

    assert!(orchestrator.generate_report().await.is_err());
}
