//! Bounded-concurrency bulk operations.
//!
//! Work is split into chunks of `batch_size` records and at most
//! `max_concurrent` chunks run at once, never more than the pool can serve.
//! A failing chunk does not stop the others; failures are counted and the
//! first few messages are kept in the [`BatchReport`].

use std::sync::LazyLock;

use futures::future::join_all;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tokio::{sync::Semaphore, time::Instant};
use tracing::{info, warn};

use crate::{
    config::BatchConfig,
    db::{BatchStatement, ConnectionManager, Row, SqlValue},
    error::DbError
};

/// Maximum number of error messages kept in a report
pub const MAX_REPORTED_ERRORS: usize = 10;

/// Postgres limit of bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

/// One record to insert or update: column name to value
pub type Record = IndexMap<String, SqlValue>;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("valid regex")
});

/// Validate a table or column name and quote it for SQL.
///
/// Identifiers cannot be bound as parameters, so anything other than
/// `name` or `schema.name` made of ASCII letters, digits and underscores
/// is rejected.
pub fn quote_identifier(name: &str) -> Result<String, DbError> {
    if !IDENTIFIER.is_match(name) {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(name
        .split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// Outcome of a bulk operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total:           usize,
    pub successful:      usize,
    pub failed:          usize,
    /// First [`MAX_REPORTED_ERRORS`] chunk failures
    pub errors:          Vec<String>,
    /// Seconds
    pub processing_time: f64,
    /// Records per second
    pub throughput:      f64
}

impl BatchReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

/// Chunked bulk writer and parallel reader
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    batch_size:     usize,
    max_concurrent: usize
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(&BatchConfig::default())
    }
}

impl BatchProcessor {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            batch_size:     config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1)
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Concurrency gate for `db`: never wider than its pool
    fn gate(&self, db: &ConnectionManager) -> Semaphore {
        let pool_max = db.config().max_connections.max(1);
        Semaphore::new(self.max_concurrent.min(pool_max))
    }

    /// Insert `records` into `table` with one multi-row `INSERT` per chunk.
    ///
    /// Columns come from the first record; a record with a different column
    /// set fails its chunk. Only invalid identifiers fail the whole call.
    pub async fn process_batch_inserts(
        &self,
        table: &str,
        records: &[Record],
        db: &ConnectionManager
    ) -> Result<BatchReport, DbError> {
        let started = Instant::now();
        let Some(first) = records.first() else {
            return Ok(BatchReport::default());
        };
        let table = quote_identifier(table)?;
        let columns: Vec<&str> = first.keys().map(String::as_str).collect();
        let quoted = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Result<Vec<_>, _>>()?;
        let head = format!("INSERT INTO {} ({}) VALUES ", table, quoted.join(", "));

        let gate = self.gate(db);
        let chunks = records.chunks(self.batch_size).map(|chunk| {
            let (gate, head, columns) = (&gate, &head, &columns);
            async move {
                let _permit = gate.acquire().await.map_err(DbError::connection)?;
                let (sql, params) = build_insert(head, columns, chunk)?;
                db.execute_query(&sql, &params).await.map(|_| ())
            }
        });
        let results = join_all(chunks).await;

        let report = summarize(records.len(), self.batch_size, results, started);
        info!(
            table = %table,
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "Batch insert finished"
        );
        Ok(report)
    }

    /// Update `updates` in `table`, matching rows on `where_column`.
    ///
    /// Each record becomes one `UPDATE`; the statements of a chunk run in a
    /// single transaction, so a failure rolls back only that chunk.
    pub async fn process_batch_updates(
        &self,
        table: &str,
        updates: &[Record],
        where_column: &str,
        db: &ConnectionManager
    ) -> Result<BatchReport, DbError> {
        let started = Instant::now();
        if updates.is_empty() {
            return Ok(BatchReport::default());
        }
        let table = quote_identifier(table)?;
        let key = quote_identifier(where_column)?;

        let gate = self.gate(db);
        let chunks = updates.chunks(self.batch_size).map(|chunk| {
            let (gate, table, key) = (&gate, &table, &key);
            async move {
                let _permit = gate.acquire().await.map_err(DbError::connection)?;
                let statements = chunk
                    .iter()
                    .map(|record| build_update(table, key, where_column, record))
                    .collect::<Result<Vec<_>, _>>()?;
                db.execute_batch(&statements).await.map(|_| ())
            }
        });
        let results = join_all(chunks).await;

        let report = summarize(updates.len(), self.batch_size, results, started);
        info!(
            table = %table,
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "Batch update finished"
        );
        Ok(report)
    }

    /// Run independent read queries under the concurrency gate.
    ///
    /// Results are in input order; each element must be checked.
    pub async fn process_parallel_queries(
        &self,
        queries: &[BatchStatement],
        db: &ConnectionManager
    ) -> Vec<Result<Vec<Row>, DbError>> {
        let gate = self.gate(db);
        let runs = queries.iter().map(|query| {
            let gate = &gate;
            async move {
                let _permit = gate.acquire().await.map_err(DbError::connection)?;
                db.execute_query(&query.sql, &query.params).await
            }
        });
        join_all(runs).await
    }
}

fn build_insert(
    head: &str,
    columns: &[&str],
    chunk: &[Record]
) -> Result<(String, Vec<SqlValue>), DbError> {
    let param_count = chunk.len() * columns.len();
    if param_count > MAX_BIND_PARAMS {
        return Err(DbError::Config(format!(
            "chunk needs {} bind parameters, the limit is {}",
            param_count, MAX_BIND_PARAMS
        )));
    }

    let mut sql = String::from(head);
    let mut params = Vec::with_capacity(param_count);
    for (row, record) in chunk.iter().enumerate() {
        if record.len() != columns.len() {
            return Err(DbError::Serialization(format!(
                "record has {} columns, expected {}",
                record.len(),
                columns.len()
            )));
        }
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (i, column) in columns.iter().enumerate() {
            let value = record.get(*column).ok_or_else(|| {
                DbError::Serialization(format!("record is missing column '{}'", column))
            })?;
            params.push(value.clone());
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("${}", params.len()));
        }
        sql.push(')');
    }
    Ok((sql, params))
}

fn build_update(
    table: &str,
    key: &str,
    where_column: &str,
    record: &Record
) -> Result<BatchStatement, DbError> {
    let key_value = record.get(where_column).ok_or_else(|| {
        DbError::Serialization(format!("record is missing key column '{}'", where_column))
    })?;

    let mut assignments = Vec::with_capacity(record.len());
    let mut params = Vec::with_capacity(record.len());
    for (column, value) in record.iter().filter(|(c, _)| c.as_str() != where_column) {
        params.push(value.clone());
        assignments.push(format!("{} = ${}", quote_identifier(column)?, params.len()));
    }
    if assignments.is_empty() {
        return Err(DbError::Serialization(format!(
            "record has no columns to update besides '{}'",
            where_column
        )));
    }
    params.push(key_value.clone());
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ${}",
        table,
        assignments.join(", "),
        key,
        params.len()
    );
    Ok(BatchStatement::new(sql, params))
}

fn summarize(
    total: usize,
    batch_size: usize,
    results: Vec<Result<(), DbError>>,
    started: Instant
) -> BatchReport {
    let mut report = BatchReport {
        total,
        ..Default::default()
    };
    for (index, result) in results.into_iter().enumerate() {
        let size = batch_size.min(total - index * batch_size);
        match result {
            Ok(()) => report.successful += size,
            Err(e) => {
                warn!(chunk = index, error = %e, "Batch chunk failed");
                report.failed += size;
                if report.errors.len() < MAX_REPORTED_ERRORS {
                    report.errors.push(format!("chunk {}: {}", index, e));
                }
            }
        }
    }
    report.processing_time = started.elapsed().as_secs_f64();
    report.throughput = if report.processing_time > 0.0 {
        total as f64 / report.processing_time
    } else {
        0.0
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, SqlValue)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn quotes_plain_and_qualified_identifiers() {
        assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
        assert_eq!(quote_identifier("public.users").unwrap(), "\"public\".\"users\"");
        for bad in ["", "1users", "users; DROP TABLE x", "a.b.c", "na\"me"] {
            assert_eq!(
                quote_identifier(bad),
                Err(DbError::InvalidIdentifier(bad.to_string()))
            );
        }
    }

    #[test]
    fn insert_numbers_placeholders_across_rows() {
        let rows = vec![
            record(&[("id", 1.into()), ("name", "a".into())]),
            record(&[("id", 2.into()), ("name", "b".into())]),
        ];
        let (sql, params) = build_insert(
            "INSERT INTO \"t\" (\"id\", \"name\") VALUES ",
            &["id", "name"],
            &rows
        )
        .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"t\" (\"id\", \"name\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(params.len(), 4);
        assert_eq!(params[2], SqlValue::Int(2));
    }

    #[test]
    fn insert_rejects_mismatched_record() {
        let rows = vec![record(&[("id", 1.into()), ("other", 2.into())])];
        assert!(build_insert("INSERT ", &["id", "name"], &rows).is_err());
    }

    #[test]
    fn update_binds_key_last() {
        let statement = build_update(
            "\"users\"",
            "\"id\"",
            "id",
            &record(&[("id", 7.into()), ("name", "x".into()), ("age", 30.into())])
        )
        .unwrap();
        assert_eq!(
            statement.sql,
            "UPDATE \"users\" SET \"name\" = $1, \"age\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(
            statement.params,
            vec![SqlValue::from("x"), SqlValue::from(30), SqlValue::from(7)]
        );
    }

    #[test]
    fn summary_counts_partial_last_chunk() {
        let results = vec![Ok(()), Err(DbError::query("INSERT", "boom")), Ok(())];
        let report = summarize(250, 100, results, Instant::now());
        assert_eq!(report.successful, 150);
        assert_eq!(report.failed, 100);
        assert_eq!(report.errors.len(), 1);
    }
}
