//! Query performance metrics and threshold alerting.
//!
//! Every execution lands in a bounded ring buffer and in a per-fingerprint
//! aggregate. Slow queries raise an alert immediately; averages, error
//! rates and connection usage are evaluated periodically by a background
//! worker over a recent window.

mod types;

use std::{
    collections::{HashMap, VecDeque},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering}
    },
    time::Duration
};

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{error, info, warn};
pub use types::{
    Alert, AlertLevel, AlertMetric, ConnectionEvent, ConnectionStats, PerformanceSummary,
    QueryMetric, QueryRecord, QueryStats, QueryStatsReport, ThresholdUpdate, Thresholds,
    query_preview
};
use xxhash_rust::xxh3::xxh3_64;

use crate::{config::MonitoringConfig, error::AppResult, worker::Worker};

/// Hook invoked for every new alert
pub type AlertCallback = Arc<dyn Fn(&Alert) -> AppResult<()> + Send + Sync>;

/// Number of entries in the summary's slowest-query list
const TOP_SLOW_QUERIES: usize = 5;

/// Stable fingerprint of a query's full text
pub fn fingerprint(query: &str) -> String {
    format!("{:016x}", xxh3_64(query.as_bytes()))
}

pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

struct Aggregate {
    stats:   QueryStats,
    preview: String
}

/// Collects execution metrics and raises alerts
pub struct MetricsCollector {
    history_capacity: usize,
    check_interval:   Duration,
    window:           Duration,
    alert_retention:  Duration,
    history:          Mutex<VecDeque<QueryMetric>>,
    aggregates:       Mutex<HashMap<String, Aggregate>>,
    alerts:           Mutex<Vec<Alert>>,
    connections:      Mutex<ConnectionStats>,
    thresholds:       RwLock<Thresholds>,
    callbacks:        RwLock<Vec<AlertCallback>>,
    next_alert_id:    AtomicU64,
    total_recorded:   AtomicU64,
    monitor:          Mutex<Option<Worker>>
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(&MonitoringConfig::default())
    }
}

impl MetricsCollector {
    pub fn new(config: &MonitoringConfig) -> Self {
        let history_capacity = config.history_capacity.max(1);
        Self {
            history_capacity,
            check_interval: config.check_interval(),
            window: config.window(),
            alert_retention: config.alert_retention(),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            aggregates: Mutex::new(HashMap::new()),
            alerts: Mutex::new(Vec::new()),
            connections: Mutex::new(ConnectionStats::default()),
            thresholds: RwLock::new(Thresholds::from(config)),
            callbacks: RwLock::new(Vec::new()),
            next_alert_id: AtomicU64::new(1),
            total_recorded: AtomicU64::new(0),
            monitor: Mutex::new(None)
        }
    }

    /// Spawn the periodic threshold monitor.
    ///
    /// Idempotent. The worker only holds a weak reference, so dropping the
    /// last `Arc` also ends monitoring.
    pub fn start(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return;
        }
        let collector: Weak<Self> = Arc::downgrade(self);
        *monitor = Some(Worker::spawn(
            "metrics-monitor",
            self.check_interval,
            move || {
                let collector = collector.clone();
                async move {
                    if let Some(collector) = collector.upgrade() {
                        collector.evaluate_thresholds();
                        collector.prune_alerts();
                    }
                }
            }
        ));
        info!(interval = ?self.check_interval, "Performance monitoring started");
    }

    pub fn is_running(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Stop the monitor and wait for an in-progress evaluation
    pub async fn shutdown(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.shutdown().await;
            info!("Performance monitoring stopped");
        }
    }

    /// Record one execution.
    ///
    /// Raises a [`AlertMetric::SlowQuery`] warning before returning when
    /// the execution exceeded the slow-query threshold.
    pub fn record_query(&self, record: QueryRecord<'_>) {
        let query_hash = fingerprint(record.query);
        let preview = query_preview(record.query);
        let timestamp = unix_now();

        let metric = QueryMetric {
            query_hash: query_hash.clone(),
            query_preview: preview.clone(),
            execution_time: record.execution_time,
            timestamp,
            success: record.success,
            error_message: record.error_message,
            affected_rows: record.affected_rows,
            recorded_at: Instant::now()
        };
        {
            let mut history = self.history.lock();
            if history.len() == self.history_capacity {
                history.pop_front();
            }
            history.push_back(metric);
        }
        {
            let mut aggregates = self.aggregates.lock();
            let aggregate = aggregates.entry(query_hash).or_insert_with(|| Aggregate {
                stats:   QueryStats::default(),
                preview: String::new()
            });
            aggregate
                .stats
                .record(record.execution_time, record.success, timestamp);
            aggregate.preview = preview.clone();
        }
        self.total_recorded.fetch_add(1, Ordering::Relaxed);

        let threshold = self.thresholds.read().slow_query;
        if record.execution_time > threshold {
            self.raise_alert(
                AlertLevel::Warning,
                AlertMetric::SlowQuery,
                format!(
                    "Slow query detected: {:.3}s - {}",
                    record.execution_time, preview
                ),
                record.execution_time,
                threshold
            );
        }
    }

    pub fn record_connection_event(&self, event: ConnectionEvent) {
        let mut stats = self.connections.lock();
        match event {
            ConnectionEvent::Connect => {
                stats.total_connections += 1;
                stats.active_connections += 1;
                stats.peak_connections = stats.peak_connections.max(stats.active_connections);
            }
            ConnectionEvent::Disconnect => {
                stats.active_connections = stats.active_connections.saturating_sub(1);
            }
            ConnectionEvent::Error => stats.connection_errors += 1
        }
    }

    /// Maximum pool size used as the denominator of connection usage
    pub fn set_pool_capacity(&self, capacity: usize) {
        self.connections.lock().pool_capacity = capacity;
    }

    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    pub fn update_thresholds(&self, update: ThresholdUpdate) {
        let mut thresholds = self.thresholds.write();
        thresholds.apply(update);
        info!(thresholds = ?*thresholds, "Updated performance thresholds");
    }

    /// Register a hook invoked synchronously for every new alert.
    ///
    /// A failing hook is logged and does not affect the others.
    pub fn add_alert_callback<F>(&self, callback: F)
    where
        F: Fn(&Alert) -> AppResult<()> + Send + Sync + 'static
    {
        self.callbacks.write().push(Arc::new(callback));
    }

    fn raise_alert(
        &self,
        level: AlertLevel,
        metric: AlertMetric,
        message: String,
        current_value: f64,
        threshold: f64
    ) -> Alert {
        let alert = Alert {
            id: self.next_alert_id.fetch_add(1, Ordering::Relaxed),
            level,
            message,
            timestamp: unix_now(),
            metric_name: metric,
            current_value,
            threshold,
            resolved: false,
            raised_at: Instant::now()
        };
        self.alerts.lock().push(alert.clone());
        warn!(
            id = alert.id,
            level = %alert.level,
            metric = %alert.metric_name,
            "{}",
            alert.message
        );

        let callbacks = self.callbacks.read().clone();
        for callback in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(id = alert.id, error = %e, "Alert callback failed"),
                Err(_) => error!(id = alert.id, "Alert callback panicked")
            }
        }
        alert
    }

    /// Evaluate window thresholds once and return the alerts raised.
    ///
    /// The background monitor calls this every check interval.
    pub fn evaluate_thresholds(&self) -> Vec<Alert> {
        let thresholds = self.thresholds();
        let mut raised = Vec::new();

        let (count, total_time, failures) = self.window_totals(self.window);
        if count > 0 {
            let avg = total_time / count as f64;
            if avg > thresholds.avg_query_time {
                raised.push(self.raise_alert(
                    AlertLevel::Warning,
                    AlertMetric::AvgQueryTime,
                    format!("High average query time: {:.3}s", avg),
                    avg,
                    thresholds.avg_query_time
                ));
            }
            let error_rate = failures as f64 / count as f64;
            if error_rate > thresholds.error_rate {
                raised.push(self.raise_alert(
                    AlertLevel::Error,
                    AlertMetric::ErrorRate,
                    format!("High error rate: {:.2}%", error_rate * 100.0),
                    error_rate,
                    thresholds.error_rate
                ));
            }
        }

        let usage = self.connections.lock().usage();
        if let Some(usage) = usage
            && usage > thresholds.connection_usage
        {
            raised.push(self.raise_alert(
                AlertLevel::Warning,
                AlertMetric::ConnectionUsage,
                format!("High connection usage: {:.1}%", usage * 100.0),
                usage,
                thresholds.connection_usage
            ));
        }
        raised
    }

    /// `(count, total execution time, failures)` inside `window`
    fn window_totals(&self, window: Duration) -> (usize, f64, usize) {
        let now = Instant::now();
        self.history
            .lock()
            .iter()
            .rev()
            .take_while(|m| now.saturating_duration_since(m.recorded_at) <= window)
            .fold((0, 0.0, 0), |(count, time, failures), m| {
                (count + 1, time + m.execution_time, failures + usize::from(!m.success))
            })
    }

    /// Drop alerts older than the retention period; returns how many
    pub fn prune_alerts(&self) -> usize {
        let now = Instant::now();
        let retention = self.alert_retention;
        let mut alerts = self.alerts.lock();
        let before = alerts.len();
        alerts.retain(|a| now.saturating_duration_since(a.raised_at) <= retention);
        before - alerts.len()
    }

    /// Top `limit` fingerprints by average execution time, slowest first
    pub fn get_query_stats(&self, limit: usize) -> Vec<QueryStatsReport> {
        let aggregates = self.aggregates.lock();
        let mut reports: Vec<QueryStatsReport> = aggregates
            .iter()
            .map(|(hash, aggregate)| QueryStatsReport {
                query_hash:    hash.clone(),
                query_preview: aggregate.preview.clone(),
                stats:         aggregate.stats.clone(),
                error_rate:    aggregate.stats.error_rate()
            })
            .collect();
        drop(aggregates);
        reports.sort_by(|a, b| b.stats.avg_time.total_cmp(&a.stats.avg_time));
        reports.truncate(limit);
        reports
    }

    /// Metrics recorded within the last `window`, oldest first
    pub fn get_recent_metrics(&self, window: Duration) -> Vec<QueryMetric> {
        let now = Instant::now();
        let history = self.history.lock();
        let mut recent: Vec<QueryMetric> = history
            .iter()
            .rev()
            .take_while(|m| now.saturating_duration_since(m.recorded_at) <= window)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Number of metrics currently held in the ring buffer
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn get_connection_stats(&self) -> ConnectionStats {
        *self.connections.lock()
    }

    pub fn get_alerts(&self, unresolved_only: bool) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| !unresolved_only || !a.resolved)
            .cloned()
            .collect()
    }

    /// Mark an alert resolved.
    ///
    /// Returns `false` when no unresolved alert has this id.
    pub fn resolve_alert(&self, id: u64) -> bool {
        let mut alerts = self.alerts.lock();
        match alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                info!(id, "Alert resolved");
                true
            }
            None => false
        }
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        let (count, total_time, failures) = self.window_totals(self.window);
        let (avg_query_time, error_rate) = if count > 0 {
            (total_time / count as f64, failures as f64 / count as f64)
        } else {
            (0.0, 0.0)
        };
        let active_alerts = self.alerts.lock().iter().filter(|a| !a.resolved).count();

        PerformanceSummary {
            total_queries: self.total_recorded.load(Ordering::Relaxed),
            recent_query_count: count,
            avg_query_time,
            error_rate,
            active_alerts,
            connection_stats: self.get_connection_stats(),
            top_slow_queries: self.get_query_stats(TOP_SLOW_QUERIES),
            timestamp: unix_now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_text_sensitive() {
        assert_eq!(fingerprint("SELECT 1"), fingerprint("SELECT 1"));
        assert_ne!(fingerprint("SELECT 1"), fingerprint("SELECT 2"));
        assert_eq!(fingerprint("SELECT 1").len(), 16);
    }

    #[test]
    fn preview_marks_truncation() {
        let long = "x".repeat(150);
        let preview = query_preview(&long);
        assert_eq!(preview.len(), 103);
        assert!(preview.ends_with("..."));
        assert_eq!(query_preview("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn usage_prefers_pool_capacity() {
        let stats = ConnectionStats {
            total_connections: 100,
            active_connections: 5,
            pool_capacity: 10,
            ..Default::default()
        };
        assert_eq!(stats.usage(), Some(0.5));
        let stats = ConnectionStats {
            total_connections: 4,
            active_connections: 2,
            ..Default::default()
        };
        assert_eq!(stats.usage(), Some(0.5));
        assert_eq!(ConnectionStats::default().usage(), None);
    }
}
