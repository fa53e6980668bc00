// SPDX-FileCopyrightText: 2025 RAprogramm
// SPDX-License-Identifier: MIT

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering}
    },
    time::Duration
};

use sql_query_layer::{
    config::MonitoringConfig,
    error::AppError,
    metrics::{
        AlertLevel, AlertMetric, ConnectionEvent, MetricsCollector, QueryRecord, ThresholdUpdate,
        fingerprint
    }
};

fn collector(configure: impl FnOnce(&mut MonitoringConfig)) -> MetricsCollector {
    let mut config = MonitoringConfig::default();
    configure(&mut config);
    MetricsCollector::new(&config)
}

#[test]
fn test_aggregates_per_fingerprint() {
    let metrics = MetricsCollector::default();
    let sql = "SELECT * FROM users WHERE id = $1";
    for time in [0.1, 0.2, 0.3, 0.4] {
        metrics.record_query(QueryRecord::success(sql, time));
    }
    metrics.record_query(QueryRecord::failure(sql, 0.5, "relation does not exist"));

    let stats = metrics.get_query_stats(10);
    assert_eq!(stats.len(), 1);
    let report = &stats[0];
    assert_eq!(report.query_hash, fingerprint(sql));
    assert_eq!(report.stats.count, 5);
    assert_eq!(report.stats.error_count, 1);
    assert!((report.stats.total_time - 1.5).abs() < 1e-9);
    assert!((report.stats.avg_time - 0.3).abs() < 1e-9);
    assert_eq!(report.stats.min_time, 0.1);
    assert_eq!(report.stats.max_time, 0.5);
    assert!((report.error_rate - 0.2).abs() < 1e-9);

    let summary = metrics.get_performance_summary();
    assert_eq!(summary.total_queries, 5);
    assert_eq!(summary.recent_query_count, 5);
    assert!((summary.error_rate - 0.2).abs() < 1e-9);
}

#[test]
fn test_query_stats_sorted_by_average() {
    let metrics = MetricsCollector::default();
    metrics.record_query(QueryRecord::success("SELECT 1", 0.01));
    metrics.record_query(QueryRecord::success("SELECT 2", 0.30));
    metrics.record_query(QueryRecord::success("SELECT 3", 0.10));

    let stats = metrics.get_query_stats(2);
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].query_preview, "SELECT 2");
    assert_eq!(stats[1].query_preview, "SELECT 3");
}

#[test]
fn test_long_queries_are_previewed() {
    let metrics = MetricsCollector::default();
    let sql = format!("SELECT {} FROM t", "x".repeat(200));
    metrics.record_query(QueryRecord::success(&sql, 0.01).affected_rows(3));

    let recent = metrics.get_recent_metrics(Duration::from_secs(60));
    assert_eq!(recent[0].affected_rows, 3);
    assert!(recent[0].query_preview.ends_with("..."));
    assert_eq!(recent[0].query_preview.chars().count(), 103);
}

#[test]
fn test_slow_query_raises_alert() {
    let metrics = MetricsCollector::default();
    metrics.record_query(QueryRecord::success("SELECT pg_sleep(2)", 2.0));
    metrics.record_query(QueryRecord::success("SELECT 1", 0.01));

    let alerts = metrics.get_alerts(true);
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.level, AlertLevel::Warning);
    assert_eq!(alert.metric_name, AlertMetric::SlowQuery);
    assert_eq!(alert.current_value, 2.0);
    assert_eq!(alert.threshold, 1.0);
    assert!(!alert.resolved);
    assert!(alert.message.contains("SELECT pg_sleep(2)"));
}

#[test]
fn test_resolve_alert() {
    let metrics = MetricsCollector::default();
    metrics.record_query(QueryRecord::success("SELECT pg_sleep(2)", 2.0));
    let id = metrics.get_alerts(true)[0].id;

    assert!(metrics.resolve_alert(id));
    assert!(!metrics.resolve_alert(id));
    assert!(!metrics.resolve_alert(id + 100));
    assert!(metrics.get_alerts(true).is_empty());
    assert_eq!(metrics.get_alerts(false).len(), 1);
    assert_eq!(metrics.get_performance_summary().active_alerts, 0);
}

#[test]
fn test_window_thresholds() {
    let metrics = MetricsCollector::default();
    for _ in 0..4 {
        metrics.record_query(QueryRecord::success("SELECT 1", 0.9));
    }
    metrics.record_query(QueryRecord::failure("SELECT 1", 0.9, "boom"));

    let raised = metrics.evaluate_thresholds();
    let kinds: Vec<AlertMetric> = raised.iter().map(|a| a.metric_name).collect();
    assert_eq!(kinds, vec![AlertMetric::AvgQueryTime, AlertMetric::ErrorRate]);
    assert_eq!(raised[1].level, AlertLevel::Error);
}

#[test]
fn test_quiet_window_raises_nothing() {
    let metrics = MetricsCollector::default();
    assert!(metrics.evaluate_thresholds().is_empty());

    metrics.record_query(QueryRecord::success("SELECT 1", 0.01));
    assert!(metrics.evaluate_thresholds().is_empty());
}

#[test]
fn test_connection_usage() {
    let metrics = MetricsCollector::default();
    metrics.set_pool_capacity(4);
    for _ in 0..4 {
        metrics.record_connection_event(ConnectionEvent::Connect);
    }
    metrics.record_connection_event(ConnectionEvent::Disconnect);
    metrics.record_connection_event(ConnectionEvent::Error);

    let stats = metrics.get_connection_stats();
    assert_eq!(stats.total_connections, 4);
    assert_eq!(stats.active_connections, 3);
    assert_eq!(stats.peak_connections, 4);
    assert_eq!(stats.connection_errors, 1);
    assert_eq!(stats.usage(), Some(0.75));
    assert!(metrics.evaluate_thresholds().is_empty());

    metrics.record_connection_event(ConnectionEvent::Connect);
    let raised = metrics.evaluate_thresholds();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].metric_name, AlertMetric::ConnectionUsage);
}

#[test]
fn test_disconnect_never_goes_negative() {
    let metrics = MetricsCollector::default();
    metrics.record_connection_event(ConnectionEvent::Disconnect);
    assert_eq!(metrics.get_connection_stats().active_connections, 0);
}

#[test]
fn test_update_thresholds() {
    let metrics = MetricsCollector::default();
    metrics.update_thresholds(ThresholdUpdate {
        slow_query: Some(5.0),
        ..Default::default()
    });

    let thresholds = metrics.thresholds();
    assert_eq!(thresholds.slow_query, 5.0);
    assert_eq!(thresholds.error_rate, 0.05);

    metrics.record_query(QueryRecord::success("SELECT pg_sleep(2)", 2.0));
    assert!(metrics.get_alerts(false).is_empty());
}

#[test]
fn test_failing_callback_does_not_block_others() {
    let metrics = MetricsCollector::default();
    let seen = Arc::new(AtomicUsize::new(0));
    metrics.add_alert_callback(|_| Err(AppError::internal("webhook down")));
    let counter = seen.clone();
    metrics.add_alert_callback(move |alert| {
        assert_eq!(alert.metric_name, AlertMetric::SlowQuery);
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    metrics.record_query(QueryRecord::success("SELECT pg_sleep(3)", 3.0));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.get_alerts(true).len(), 1);
}

#[test]
fn test_panicking_callback_is_isolated() {
    let metrics = MetricsCollector::default();
    let seen = Arc::new(AtomicUsize::new(0));
    metrics.add_alert_callback(|_| panic!("notifier crashed"));
    let counter = seen.clone();
    metrics.add_alert_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    metrics.record_query(QueryRecord::success("SELECT pg_sleep(3)", 3.0));
    metrics.record_query(QueryRecord::success("SELECT pg_sleep(4)", 4.0));

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(metrics.get_alerts(true).len(), 2);
    assert_eq!(metrics.get_performance_summary().total_queries, 2);
}

#[test]
fn test_history_is_bounded() {
    let metrics = collector(|c| c.history_capacity = 3);
    for i in 0..5 {
        metrics.record_query(QueryRecord::success(&format!("SELECT {}", i), 0.01));
    }

    assert_eq!(metrics.history_len(), 3);
    assert_eq!(metrics.get_performance_summary().total_queries, 5);
    let recent = metrics.get_recent_metrics(Duration::from_secs(60));
    assert_eq!(recent[0].query_preview, "SELECT 2");
}

#[tokio::test(start_paused = true)]
async fn test_recent_metrics_window() {
    let metrics = MetricsCollector::default();
    metrics.record_query(QueryRecord::success("SELECT old", 0.01));
    tokio::time::advance(Duration::from_secs(20)).await;
    metrics.record_query(QueryRecord::success("SELECT new", 0.01));

    let recent = metrics.get_recent_metrics(Duration::from_secs(10));
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].query_preview, "SELECT new");
}

#[tokio::test(start_paused = true)]
async fn test_summary_only_counts_window() {
    let metrics = collector(|c| c.window_secs = 60);
    metrics.record_query(QueryRecord::failure("SELECT 1", 0.01, "boom"));
    tokio::time::advance(Duration::from_secs(61)).await;
    metrics.record_query(QueryRecord::success("SELECT 1", 0.01));

    let summary = metrics.get_performance_summary();
    assert_eq!(summary.total_queries, 2);
    assert_eq!(summary.recent_query_count, 1);
    assert_eq!(summary.error_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_old_alerts_are_pruned() {
    let metrics = collector(|c| c.alert_retention_secs = 60);
    metrics.record_query(QueryRecord::success("SELECT pg_sleep(2)", 2.0));

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(metrics.prune_alerts(), 0);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(metrics.prune_alerts(), 1);
    assert!(metrics.get_alerts(false).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_background_monitor() {
    let metrics = Arc::new(collector(|c| c.check_interval_secs = 10));
    metrics.record_query(QueryRecord::failure("SELECT 1", 0.01, "boom"));
    metrics.start();
    assert!(metrics.is_running());

    tokio::time::sleep(Duration::from_secs(11)).await;
    let alerts = metrics.get_alerts(true);
    assert!(alerts.iter().any(|a| a.metric_name == AlertMetric::ErrorRate));

    metrics.shutdown().await;
    assert!(!metrics.is_running());
}
