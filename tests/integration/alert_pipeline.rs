//! Alert evaluation over a live collector buffer

use std::sync::Arc;

use pretty_assertions::assert_eq;
use quiz_monitoring::{
    MetricPoint,
    alerts::{AlertKey, AlertManager, AlertStatus, FileSink, LogSink},
    clock::{Clock, ManualClock},
    collector::MetricsCollector,
    config::{Condition, Severity, default_alert_rules},
    probes::{ApplicationMetrics, ApplicationProbe, FnProbe},
};

use crate::helpers::*;

#[tokio::test]
async fn test_cpu_fires_then_resolves() {
    let mut pipeline = AlertPipeline::new(vec![rule("High CPU", "cpu", Condition::GreaterThan, 80.0)]);

    for _ in 0..5 {
        pipeline.feed("cpu", 85.0);
    }
    let transitions = pipeline.manager.evaluate().await;
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].severity, Severity::Warning);
    assert_eq!(transitions[0].current_value, 85.0);

    pipeline.skip_window();
    for _ in 0..5 {
        pipeline.feed("cpu", 50.0);
    }
    let transitions = pipeline.manager.evaluate().await;
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].status, AlertStatus::Resolved);

    let statuses: Vec<_> = pipeline
        .drain_notifications()
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(statuses, vec![AlertStatus::Active, AlertStatus::Resolved]);

    let summary = pipeline.manager.get_summary();
    assert_eq!(summary.active_alerts, 0);
    assert_eq!(summary.alert_history_count, 2);
}

#[tokio::test]
async fn test_empty_buffer_is_quiet() {
    let mut pipeline = AlertPipeline::new(default_alert_rules());

    assert!(pipeline.manager.evaluate().await.is_empty());
    assert!(pipeline.drain_notifications().is_empty());
    assert_eq!(pipeline.manager.get_summary().total_rules, 4);
}

#[tokio::test]
async fn test_default_rules_on_collected_metrics() {
    let mut pipeline = AlertPipeline::new(default_alert_rules());

    pipeline.feed("system_cpu_usage_percent", 97.0);
    pipeline.feed("system_memory_usage_percent", 40.0);
    pipeline.feed("application_errors_total", 12.0);

    let fired: Vec<_> = pipeline
        .manager
        .evaluate()
        .await
        .into_iter()
        .map(|r| r.rule_name)
        .collect();

    // registration order is kept
    assert_eq!(
        fired,
        vec!["High CPU Usage", "Critical CPU Usage", "High Error Rate"]
    );
    assert_eq!(pipeline.drain_notifications().len(), 3);
}

#[tokio::test]
async fn test_equal_condition_uses_epsilon() {
    let pipeline = AlertPipeline::new(vec![rule("Pinned", "queue_depth", Condition::Equal, 0.0)]);

    pipeline.feed("queue_depth", 0.005);
    assert_eq!(pipeline.manager.evaluate().await.len(), 1);

    pipeline.skip_window();
    pipeline.feed("queue_depth", 0.02);
    assert_eq!(
        pipeline.manager.evaluate().await[0].status,
        AlertStatus::Resolved
    );
}

#[tokio::test]
async fn test_metric_gap_keeps_alert_active() {
    let pipeline = AlertPipeline::new(vec![rule("Low Memory", "mem_free", Condition::LessThan, 10.0)]);

    pipeline.feed("mem_free", 5.0);
    pipeline.manager.evaluate().await;

    // no points in the window: the rule is skipped, not resolved
    pipeline.skip_window();
    assert!(pipeline.manager.evaluate().await.is_empty());
    assert!(pipeline.manager.is_active(&AlertKey {
        rule_name: "Low Memory".to_string(),
        metric: "mem_free".to_string(),
    }));
}

#[tokio::test]
async fn test_collected_points_feed_the_engine() {
    let clock = Arc::new(ManualClock::default());
    let probe_clock = clock.clone();

    let collector = Arc::new(MetricsCollector::new(
        vec![Box::new(FnProbe::new("load", move || {
            Ok(vec![MetricPoint::new("load", 99.0).at(probe_clock.now())])
        }))],
        clock.clone(),
    ));

    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path().join("alerts.log"));
    let mut manager = AlertManager::new(collector.clone(), Arc::new(sink.clone()), clock);
    manager.add_rule(rule("High Load", "load", Condition::GreaterThan, 90.0));

    assert!(collector.collect_once().await.is_success());
    assert_eq!(manager.evaluate().await.len(), 1);

    let log = std::fs::read_to_string(sink.path()).unwrap();
    assert!(log.contains("Rule: High Load"));
    assert!(log.contains("Status: ACTIVE"));
}

#[tokio::test]
async fn test_mixed_error_types_fire_error_rate() {
    let clock = Arc::new(ManualClock::default());
    let metrics = ApplicationMetrics::new().unwrap();

    let collector = Arc::new(MetricsCollector::new(
        vec![Box::new(ApplicationProbe::new(metrics.clone(), clock.clone()))],
        clock.clone(),
    ));
    let mut manager = AlertManager::new(collector.clone(), Arc::new(LogSink), clock);
    for rule in default_alert_rules() {
        manager.add_rule(rule);
    }

    for _ in 0..8 {
        metrics.record_error("validation_error");
        metrics.record_error("upstream_timeout");
    }
    assert!(collector.collect_once().await.is_success());

    let fired: Vec<_> = manager
        .evaluate()
        .await
        .into_iter()
        .map(|r| (r.rule_name, r.current_value))
        .collect();

    assert_eq!(fired, vec![("High Error Rate".to_string(), 16.0)]);
}
