//! Concurrent collection and evaluation
//!
//! The alert engine reads the collector's buffer while the collector keeps
//! appending; reads must always see a consistent copy.

use std::sync::Arc;
use std::time::Duration;

use quiz_monitoring::{
    MetricPoint,
    alerts::{AlertManager, LogSink},
    clock::system_clock,
    collector::MetricsCollector,
    config::Condition,
    probes::FnProbe,
};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_evaluation_while_collecting() {
    let collector = Arc::new(
        MetricsCollector::new(
            vec![Box::new(FnProbe::new("cpu", || {
                Ok(vec![MetricPoint::new("cpu", 90.0)])
            }))],
            system_clock(),
        )
        .with_interval(Duration::from_millis(1))
        .with_max_points(500),
    );

    let mut manager = AlertManager::new(collector.clone(), Arc::new(LogSink), system_clock());
    manager.add_rule(rule("High CPU", "cpu", Condition::GreaterThan, 80.0));
    let manager = Arc::new(manager);

    let cancel = CancellationToken::new();
    let collecting = tokio::spawn(collector.clone().run(cancel.clone()));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let collector = collector.clone();
        let manager = manager.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                manager.evaluate().await;
                let points = collector.query("cpu", Duration::from_secs(60));
                assert!(points.iter().all(|p| p.value == 90.0));
                tokio::task::yield_now().await;
            }
        }));
    }

    for reader in readers {
        reader.await.unwrap();
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), collecting)
        .await
        .unwrap()
        .unwrap();

    // concurrent passes never duplicate the single transition
    assert_eq!(manager.history().len(), 1);
    assert!(collector.len() <= 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_appends_are_all_kept() {
    let collector = Arc::new(MetricsCollector::new(Vec::new(), system_clock()));

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let collector = collector.clone();
            tokio::spawn(async move {
                for j in 0..100 {
                    collector.record([MetricPoint::new("requests", f64::from(i * 100 + j))]);
                }
            })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap();
    }

    assert_eq!(collector.len(), 800);
    assert_eq!(collector.query("requests", Duration::from_secs(60)).len(), 800);
}
