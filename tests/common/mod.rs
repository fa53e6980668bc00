//! In-memory backing store shared by the integration tests.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering}
    },
    time::Duration
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sql_query_layer::{
    config::DatabaseConfig,
    db::{Backend, BatchStatement, Connector, PoolStatus, QueryOutput, Row, SqlValue},
    error::DbError
};

#[derive(Default)]
struct State {
    fail_marker: Option<String>,
    fail_param:  Option<SqlValue>,
    unreachable: bool,
    delay:       Duration,
    committed:   Mutex<Vec<String>>,
    connects:    AtomicUsize,
    in_flight:   AtomicUsize,
    peak_flight: AtomicUsize,
    closed:      AtomicBool
}

/// Fake store: remembers committed statements and fails any statement
/// containing the configured marker or bound to the configured value.
#[derive(Clone)]
pub struct FakeStore {
    state: Arc<State>
}

impl FakeStore {
    pub fn new() -> Self {
        Self::build(|_| {})
    }

    pub fn failing_on(marker: &str) -> Self {
        let marker = marker.to_string();
        Self::build(move |s| s.fail_marker = Some(marker))
    }

    pub fn failing_on_param(value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        Self::build(move |s| s.fail_param = Some(value))
    }

    pub fn unreachable() -> Self {
        Self::build(|s| s.unreachable = true)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self::build(|s| s.delay = delay)
    }

    fn build(configure: impl FnOnce(&mut State)) -> Self {
        let mut state = State::default();
        configure(&mut state);
        Self {
            state: Arc::new(state)
        }
    }

    pub fn committed(&self) -> Vec<String> {
        self.state.committed.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.peak_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeStore {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<dyn Backend>, DbError> {
        if self.state.unreachable {
            return Err(DbError::connection("connection refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBackend {
            shared:   self.state.clone(),
            max_size: config.max_connections
        }))
    }
}

struct FakeBackend {
    shared:   Arc<State>,
    max_size: usize
}

impl FakeBackend {
    fn fails(&self, sql: &str, params: &[SqlValue]) -> bool {
        let by_sql = self
            .shared
            .fail_marker
            .as_deref()
            .is_some_and(|marker| sql.contains(marker));
        let by_param = self
            .shared
            .fail_param
            .as_ref()
            .is_some_and(|value| params.contains(value));
        by_sql || by_param
    }

    async fn hold(&self) {
        let _slot = InFlight::enter(&self.shared);
        if self.shared.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.shared.delay).await;
        }
    }
}

/// Released on drop so abandoned calls leave the in-flight count intact
struct InFlight<'a>(&'a State);

impl<'a> InFlight<'a> {
    fn enter(state: &'a State) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn echo_row(sql: &str, params: &[SqlValue]) -> Row {
    let mut row = Row::new();
    row.insert("sql".to_string(), json!(sql));
    row.insert("params".to_string(), json!(params.len()));
    row
}

#[async_trait]
impl Backend for FakeBackend {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, DbError> {
        self.hold().await;
        if self.fails(sql, params) {
            return Err(DbError::query(sql, "simulated failure"));
        }
        self.shared.committed.lock().push(sql.to_string());
        Ok(QueryOutput {
            rows:          vec![echo_row(sql, params)],
            affected_rows: 1
        })
    }

    async fn transaction(
        &self,
        statements: &[BatchStatement]
    ) -> Result<Vec<QueryOutput>, DbError> {
        self.hold().await;
        if let Some(bad) = statements.iter().find(|s| self.fails(&s.sql, &s.params)) {
            return Err(DbError::query(&bad.sql, "simulated failure"));
        }
        let mut committed = self.shared.committed.lock();
        Ok(statements
            .iter()
            .map(|s| {
                committed.push(s.sql.clone());
                QueryOutput {
                    rows:          vec![echo_row(&s.sql, &s.params)],
                    affected_rows: 1
                }
            })
            .collect())
    }

    fn status(&self) -> PoolStatus {
        let busy = self.shared.in_flight.load(Ordering::SeqCst);
        PoolStatus {
            max_size:  self.max_size,
            size:      busy.max(1),
            available: 1usize.saturating_sub(busy),
            waiting:   0
        }
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}
