//! Application context owning every component.
//!
//! [`Database`] is built once at startup and handed to whatever needs the
//! store. Tests build a fresh one per case.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    batch::BatchProcessor,
    cache::{CacheKey, CacheStats, QueryCache, cached_call},
    config::Config,
    db::{ConnectionManager, Connector, HealthCheck, PostgresConnector, Row, SqlValue},
    error::DbError,
    metrics::{Alert, MetricsCollector, PerformanceSummary, QueryStatsReport},
    optimizer::QueryOptimizer
};

/// Number of entries in the status report's query ranking
const STATUS_TOP_QUERIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded
}

/// Combined snapshot for an operational status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub status:            HealthStatus,
    pub database:          HealthCheck,
    pub cache:             CacheStats,
    pub performance:       PerformanceSummary,
    pub top_queries:       Vec<QueryStatsReport>,
    pub unresolved_alerts: Vec<Alert>
}

/// Every component, wired together
pub struct Database {
    config:    Config,
    manager:   ConnectionManager,
    cache:     Arc<QueryCache>,
    metrics:   Arc<MetricsCollector>,
    optimizer: QueryOptimizer,
    batch:     BatchProcessor
}

impl Database {
    /// Context backed by Postgres
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, PostgresConnector)
    }

    /// Context backed by an arbitrary [`Connector`]
    pub fn with_connector(config: Config, connector: impl Connector + 'static) -> Self {
        let metrics = Arc::new(MetricsCollector::new(&config.monitoring));
        let manager = ConnectionManager::with_connector(config.database.clone(), connector)
            .with_metrics(metrics.clone())
            .with_slow_query_threshold(config.monitoring.slow_query_threshold);
        Self {
            cache: Arc::new(QueryCache::new(&config.cache)),
            optimizer: QueryOptimizer::new(),
            batch: BatchProcessor::new(&config.batch),
            manager,
            metrics,
            config
        }
    }

    /// Connect and start the background workers.
    ///
    /// Workers are only started once the pool is up.
    pub async fn start(&self) -> Result<(), DbError> {
        self.manager.initialize().await?;
        self.cache.start();
        self.metrics.start();
        info!("Database context started");
        Ok(())
    }

    /// Stop the workers, drop cached entries and close the pool
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
        self.metrics.shutdown().await;
        self.manager.cleanup().await;
        info!("Database context shut down");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn optimizer(&self) -> &QueryOptimizer {
        &self.optimizer
    }

    pub fn batch(&self) -> &BatchProcessor {
        &self.batch
    }

    /// Read-through cached query.
    ///
    /// Rows are served from the cache while fresh; otherwise the query runs
    /// and its rows are cached under `tags`. Failures are never cached.
    pub async fn cached_query<I, S>(
        &self,
        sql: &str,
        params: &[SqlValue],
        ttl: Option<Duration>,
        tags: I
    ) -> Result<Vec<Row>, DbError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        let key = CacheKey::new(sql, params);
        cached_call(&self.cache, &key, ttl, tags, || {
            self.manager.execute_query(sql, params)
        })
        .await
    }

    /// Health, cache, performance and alert snapshot.
    ///
    /// Degraded whenever the backing store fails its probe.
    pub async fn status_report(&self) -> StatusReport {
        let database = self.manager.health_check().await;
        let status = if database.backing_store_healthy {
            HealthStatus::Healthy
        } else {
            warn!(error = ?database.error, "Backing store unhealthy");
            HealthStatus::Degraded
        };
        StatusReport {
            status,
            database,
            cache: self.cache.get_stats(),
            performance: self.metrics.get_performance_summary(),
            top_queries: self.metrics.get_query_stats(STATUS_TOP_QUERIES),
            unresolved_alerts: self.metrics.get_alerts(true)
        }
    }
}
