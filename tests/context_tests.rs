mod common;

use std::time::Duration;

use common::FakeStore;
use sql_query_layer::{
    batch::Record,
    config::Config,
    context::{Database, HealthStatus},
    db::SqlValue,
    error::DbError
};

#[tokio::test]
async fn test_start_wires_every_component() {
    let store = FakeStore::new();
    let database = Database::with_connector(Config::default(), store.clone());

    database.start().await.unwrap();

    assert!(database.db().is_initialized());
    assert!(database.cache().is_running());
    assert!(database.metrics().is_running());
    assert_eq!(database.metrics().get_connection_stats().pool_capacity, 10);

    database.shutdown().await;
    assert!(!database.cache().is_running());
    assert!(!database.metrics().is_running());
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_failed_start_leaves_workers_stopped() {
    let database = Database::with_connector(Config::default(), FakeStore::unreachable());

    assert!(database.start().await.unwrap_err().is_connection());
    assert!(!database.cache().is_running());
    assert!(!database.metrics().is_running());
}

#[tokio::test]
async fn test_cached_query_reads_through() {
    let store = FakeStore::new();
    let database = Database::with_connector(Config::default(), store.clone());
    database.start().await.unwrap();
    let sql = "SELECT id FROM courses WHERE org_id = $1";
    let params = [SqlValue::from(7)];

    let first = database
        .cached_query(sql, &params, None, ["org:7"])
        .await
        .unwrap();
    let second = database
        .cached_query(sql, &params, None, ["org:7"])
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(store.committed().len(), 1);
    assert_eq!(database.cache().get_stats().hits, 1);
    assert_eq!(database.metrics().get_performance_summary().total_queries, 1);

    database.cache().invalidate_by_tags(&["org:7"]);
    database
        .cached_query(sql, &params, Some(Duration::from_secs(5)), ["org:7"])
        .await
        .unwrap();
    assert_eq!(store.committed().len(), 2);
    database.shutdown().await;
}

#[tokio::test]
async fn test_cached_query_failures_are_not_cached() {
    let store = FakeStore::failing_on("broken");
    let database = Database::with_connector(Config::default(), store);
    database.start().await.unwrap();

    let err = database
        .cached_query("SELECT * FROM broken", &[], None, ["t"])
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::QueryExecution { .. }));
    assert!(database.cache().is_empty());
    database.shutdown().await;
}

#[tokio::test]
async fn test_status_report_healthy() {
    let database = Database::with_connector(Config::default(), FakeStore::new());
    database.start().await.unwrap();
    database
        .db()
        .execute_query("SELECT name FROM users", &[])
        .await
        .unwrap();

    let report = database.status_report().await;

    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.database.backing_store_healthy);
    assert_eq!(report.top_queries.len(), 1);
    assert_eq!(report.performance.total_queries, 1);
    assert!(report.unresolved_alerts.is_empty());
    database.shutdown().await;
}

#[tokio::test]
async fn test_status_report_degraded_without_pool() {
    let database = Database::with_connector(Config::default(), FakeStore::unreachable());
    let _ = database.start().await;

    let report = database.status_report().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(!report.database.pool_available);
    assert!(report.database.error.is_some());
}

#[tokio::test]
async fn test_status_report_serializes() {
    let database = Database::with_connector(Config::default(), FakeStore::new());
    database.start().await.unwrap();

    let report = database.status_report().await;
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"]["backing_store_healthy"], true);
    assert_eq!(json["database"]["pool_max_size"], 10);
    assert_eq!(json["cache"]["max_size"], 1000);
    database.shutdown().await;
}

#[tokio::test]
async fn test_batch_uses_context_pool() {
    let store = FakeStore::new();
    let database = Database::with_connector(Config::default(), store.clone());
    database.start().await.unwrap();
    let records: Vec<Record> = (0..3i64)
        .map(|i| Record::from_iter([("id".to_string(), SqlValue::from(i))]))
        .collect();

    let report = database
        .batch()
        .process_batch_inserts("events", &records, database.db())
        .await
        .unwrap();

    assert_eq!(report.successful, 3);
    assert_eq!(database.optimizer().analyze_query(&store.committed()[0]).suggestions.len(), 0);
    database.shutdown().await;
}
