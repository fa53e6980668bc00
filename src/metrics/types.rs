use std::fmt;

use serde::Serialize;
use tokio::time::Instant;

use crate::{config::MonitoringConfig, error::truncate};

/// Number of characters of query text kept in previews
pub const PREVIEW_CHARS: usize = 100;

/// First [`PREVIEW_CHARS`] characters of `query`, with `...` appended when
/// the text was cut
pub fn query_preview(query: &str) -> String {
    let head = truncate(query, PREVIEW_CHARS);
    if head.len() < query.len() {
        format!("{}...", head)
    } else {
        head.to_string()
    }
}

/// One execution as reported to [`record_query`](super::MetricsCollector::record_query)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord<'a> {
    pub query:          &'a str,
    /// Seconds
    pub execution_time: f64,
    pub success:        bool,
    pub error_message:  Option<String>,
    pub affected_rows:  u64
}

impl<'a> QueryRecord<'a> {
    pub fn success(query: &'a str, execution_time: f64) -> Self {
        Self {
            query,
            execution_time,
            success: true,
            error_message: None,
            affected_rows: 0
        }
    }

    pub fn failure(query: &'a str, execution_time: f64, error: impl Into<String>) -> Self {
        Self {
            query,
            execution_time,
            success: false,
            error_message: Some(error.into()),
            affected_rows: 0
        }
    }

    pub fn affected_rows(mut self, rows: u64) -> Self {
        self.affected_rows = rows;
        self
    }
}

/// Immutable record of one execution kept in the history ring buffer
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetric {
    pub query_hash:     String,
    pub query_preview:  String,
    pub execution_time: f64,
    /// Unix seconds
    pub timestamp:      f64,
    pub success:        bool,
    pub error_message:  Option<String>,
    pub affected_rows:  u64,
    #[serde(skip)]
    pub recorded_at:    Instant
}

/// Running aggregate for one query fingerprint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    pub count:         u64,
    pub total_time:    f64,
    pub avg_time:      f64,
    pub min_time:      f64,
    pub max_time:      f64,
    pub error_count:   u64,
    /// Unix seconds of the latest execution
    pub last_executed: f64
}

impl Default for QueryStats {
    fn default() -> Self {
        Self {
            count:         0,
            total_time:    0.0,
            avg_time:      0.0,
            min_time:      f64::INFINITY,
            max_time:      0.0,
            error_count:   0,
            last_executed: 0.0
        }
    }
}

impl QueryStats {
    pub(crate) fn record(&mut self, execution_time: f64, success: bool, timestamp: f64) {
        self.count += 1;
        self.total_time += execution_time;
        self.avg_time = self.total_time / self.count as f64;
        self.min_time = self.min_time.min(execution_time);
        self.max_time = self.max_time.max(execution_time);
        if !success {
            self.error_count += 1;
        }
        self.last_executed = timestamp;
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }
}

/// Per-fingerprint statistics annotated for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStatsReport {
    pub query_hash:    String,
    pub query_preview: String,
    #[serde(flatten)]
    pub stats:         QueryStats,
    pub error_rate:    f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL")
        }
    }
}

/// Metric an alert was raised for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    SlowQuery,
    AvgQueryTime,
    ErrorRate,
    ConnectionUsage
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SlowQuery => "slow_query",
            Self::AvgQueryTime => "avg_query_time",
            Self::ErrorRate => "error_rate",
            Self::ConnectionUsage => "connection_usage"
        }
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold violation.
///
/// Created unresolved; [`resolve_alert`](super::MetricsCollector::resolve_alert)
/// is the only mutation and cannot be undone.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id:            u64,
    pub level:         AlertLevel,
    pub message:       String,
    /// Unix seconds
    pub timestamp:     f64,
    pub metric_name:   AlertMetric,
    pub current_value: f64,
    pub threshold:     f64,
    pub resolved:      bool,
    #[serde(skip)]
    pub raised_at:     Instant
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Disconnect,
    Error
}

/// Process-wide connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total_connections:  u64,
    pub active_connections: usize,
    pub connection_errors:  u64,
    pub peak_connections:   usize,
    /// Maximum pool size, 0 until a pool reports it
    pub pool_capacity:      usize
}

impl ConnectionStats {
    /// Active connections relative to the pool capacity.
    ///
    /// Falls back to the lifetime connection count when no capacity is
    /// known; `None` when neither is available.
    pub fn usage(&self) -> Option<f64> {
        let denominator = if self.pool_capacity > 0 {
            self.pool_capacity as f64
        } else {
            self.total_connections as f64
        };
        (denominator > 0.0).then(|| self.active_connections as f64 / denominator)
    }
}

/// Alerting thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    /// Seconds
    pub slow_query:       f64,
    /// Fraction of failed executions in the window
    pub error_rate:       f64,
    /// Fraction of the pool in use
    pub connection_usage: f64,
    /// Seconds
    pub avg_query_time:   f64
}

impl From<&MonitoringConfig> for Thresholds {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            slow_query:       config.slow_query_threshold,
            error_rate:       config.error_rate_threshold,
            connection_usage: config.connection_usage_threshold,
            avg_query_time:   config.avg_query_time_threshold
        }
    }
}

/// Partial threshold update; `None` keeps the current value
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThresholdUpdate {
    pub slow_query:       Option<f64>,
    pub error_rate:       Option<f64>,
    pub connection_usage: Option<f64>,
    pub avg_query_time:   Option<f64>
}

impl Thresholds {
    pub(crate) fn apply(&mut self, update: ThresholdUpdate) {
        if let Some(v) = update.slow_query {
            self.slow_query = v;
        }
        if let Some(v) = update.error_rate {
            self.error_rate = v;
        }
        if let Some(v) = update.connection_usage {
            self.connection_usage = v;
        }
        if let Some(v) = update.avg_query_time {
            self.avg_query_time = v;
        }
    }
}

/// Aggregate snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    /// Executions recorded since the collector was created
    pub total_queries:      u64,
    /// Executions inside the monitoring window
    pub recent_query_count: usize,
    pub avg_query_time:     f64,
    pub error_rate:         f64,
    pub active_alerts:      usize,
    pub connection_stats:   ConnectionStats,
    pub top_slow_queries:   Vec<QueryStatsReport>,
    /// Unix seconds
    pub timestamp:          f64
}
