//! Postgres backend on top of `deadpool-postgres`.

use std::{error::Error as StdError, fs, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts
};
use parking_lot::Mutex;
use rustls::{ClientConfig, RootCertStore};
use serde_json::Value;
use tokio::time;
use tokio_postgres::{
    CancelToken, GenericClient, Row as PgRow, Statement,
    types::{FromSql, IsNull, ToSql, Type, WrongType}
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    backend::{Backend, Connector},
    types::{BatchStatement, PoolStatus, QueryOutput, Row, SqlValue}
};
use crate::{config::DatabaseConfig, error::DbError, worker::Worker};

type BoxError = Box<dyn StdError + Sync + Send>;

/// Creates [`PostgresBackend`] pools from [`DatabaseConfig`]
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresConnector;

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<dyn Backend>, DbError> {
        let backend = PostgresBackend::connect(config).await?;
        Ok(Arc::new(backend))
    }
}

/// Pooled Postgres connections
pub struct PostgresBackend {
    pool:            Pool,
    tls:             MakeRustlsConnect,
    command_timeout: Duration,
    reaper:          Mutex<Option<Worker>>
}

impl PostgresBackend {
    /// Build the pool, pre-warm `min_connections` and start the lifetime
    /// reaper.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                DbError::Config(
                    "database url is not configured (set DATABASE_URL or database.url)".into()
                )
            })?;

        let command_timeout = config.command_timeout();
        let max_size = config.max_connections.max(1);

        let mut settings = PoolSettings::new();
        settings.url = Some(url.to_string());
        settings.application_name = Some(config.application_name.clone());
        settings.options = Some(format!(
            "-c statement_timeout={} -c jit=off",
            command_timeout.as_millis()
        ));
        settings.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast
        });
        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(command_timeout);
        timeouts.create = Some(command_timeout);
        timeouts.recycle = Some(command_timeout);
        let mut pool_config = PoolConfig::new(max_size);
        pool_config.timeouts = timeouts;
        settings.pool = Some(pool_config);

        let tls = tls_connector(config)?;
        let pool = settings
            .create_pool(Some(Runtime::Tokio1), tls.clone())
            .map_err(|e| DbError::Config(e.to_string()))?;

        let warm = config.min_connections.min(max_size);
        let warmed = futures::future::try_join_all((0..warm).map(|_| pool.get()))
            .await
            .map_err(DbError::connection)?;
        drop(warmed);

        let reaper = spawn_reaper(pool.clone(), config.max_lifetime());
        info!(
            max_size,
            min_size = warm,
            timeout = ?command_timeout,
            "Postgres connection pool initialized"
        );

        Ok(Self {
            pool,
            tls,
            command_timeout,
            reaper: Mutex::new(reaper)
        })
    }

    async fn acquire(&self) -> Result<deadpool_postgres::Object, DbError> {
        self.pool.get().await.map_err(DbError::connection)
    }
}

/// TLS for the pool and for cancel requests.
///
/// Whether TLS is used is decided by `sslmode` in the URL (`prefer` when
/// absent). Server certificates are checked against `ssl_root_cert` when
/// configured, otherwise against the bundled web PKI roots.
fn tls_connector(config: &DatabaseConfig) -> Result<MakeRustlsConnect, DbError> {
    let mut roots = RootCertStore::empty();
    match &config.ssl_root_cert {
        Some(path) => {
            let pem = fs::read(path).map_err(|e| {
                DbError::Config(format!("cannot read ssl_root_cert '{}': {}", path.display(), e))
            })?;
            let mut reader = pem.as_slice();
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    DbError::Config(format!("invalid PEM in '{}': {}", path.display(), e))
                })?;
                roots.add(cert).map_err(|e| {
                    DbError::Config(format!("rejected certificate in '{}': {}", path.display(), e))
                })?;
            }
            if roots.is_empty() {
                return Err(DbError::Config(format!(
                    "no certificates found in ssl_root_cert '{}'",
                    path.display()
                )));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DbError::Config(format!("TLS setup failed: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(tls))
}

fn spawn_reaper(pool: Pool, max_lifetime: Duration) -> Option<Worker> {
    if max_lifetime.is_zero() {
        return None;
    }
    let period = (max_lifetime / 2).max(Duration::from_secs(1));
    Some(Worker::spawn("connection-reaper", period, move || {
        let pool = pool.clone();
        async move {
            let before = pool.status().size;
            let _ = pool.retain(|_, metrics| metrics.age() < max_lifetime);
            let after = pool.status().size;
            if after < before {
                debug!(closed = before - after, "recycled connections past max lifetime");
            }
        }
    }))
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryOutput, DbError> {
        let client = self.acquire().await?;
        let guard = CancelOnDrop::new(client.cancel_token(), self.tls.clone());

        let work = async {
            let stmt = client
                .prepare_cached(sql)
                .await
                .map_err(|e| DbError::query(sql, e))?;
            let pg: &tokio_postgres::Client = &client;
            run_statement(pg, &stmt, sql, params).await
        };
        let output = time::timeout(self.command_timeout, work)
            .await
            .map_err(|_| DbError::timeout(sql, self.command_timeout))?;

        guard.disarm();
        output
    }

    async fn transaction(
        &self,
        statements: &[BatchStatement]
    ) -> Result<Vec<QueryOutput>, DbError> {
        let mut client = self.acquire().await?;
        let guard = CancelOnDrop::new(client.cancel_token(), self.tls.clone());
        let label = statements
            .first()
            .map(|s| s.sql.as_str())
            .unwrap_or("BEGIN");

        let work = async {
            let tx = client
                .transaction()
                .await
                .map_err(|e| DbError::query("BEGIN", e))?;
            let mut outputs = Vec::with_capacity(statements.len());
            for statement in statements {
                let stmt = tx
                    .prepare_cached(&statement.sql)
                    .await
                    .map_err(|e| DbError::query(&statement.sql, e))?;
                let pg_tx: &tokio_postgres::Transaction<'_> = &tx;
                // an early return drops `tx`, which rolls back
                outputs.push(run_statement(pg_tx, &stmt, &statement.sql, &statement.params).await?);
            }
            tx.commit()
                .await
                .map_err(|e| DbError::query("COMMIT", e))?;
            Ok::<_, DbError>(outputs)
        };
        let outputs = time::timeout(self.command_timeout, work)
            .await
            .map_err(|_| DbError::timeout(label, self.command_timeout))?;

        guard.disarm();
        outputs
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size:  status.max_size,
            size:      status.size,
            available: status.available as usize,
            waiting:   status.waiting
        }
    }

    async fn close(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }
        self.pool.close();
        info!("Postgres connection pool closed");
    }
}

async fn run_statement<C: GenericClient>(
    client: &C,
    stmt: &Statement,
    sql: &str,
    params: &[SqlValue]
) -> Result<QueryOutput, DbError> {
    let bound: Vec<&(dyn ToSql + Sync)> = params
        .iter()
        .map(|p| p as &(dyn ToSql + Sync))
        .collect();

    if stmt.columns().is_empty() {
        let affected_rows = client
            .execute(stmt, &bound)
            .await
            .map_err(|e| DbError::query(sql, e))?;
        return Ok(QueryOutput {
            rows: Vec::new(),
            affected_rows
        });
    }

    let rows = client
        .query(stmt, &bound)
        .await
        .map_err(|e| DbError::query(sql, e))?;
    let rows = rows
        .iter()
        .map(row_to_map)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(QueryOutput {
        affected_rows: rows.len() as u64,
        rows
    })
}

/// Cancels the running server-side query unless disarmed.
///
/// Dropped without disarming when the command timeout elapses or when the
/// caller abandons the future.
struct CancelOnDrop {
    token: Option<CancelToken>,
    tls:   MakeRustlsConnect
}

impl CancelOnDrop {
    fn new(token: CancelToken, tls: MakeRustlsConnect) -> Self {
        Self {
            token: Some(token),
            tls
        }
    }

    fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let tls = self.tls.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = token.cancel_query(tls).await {
                    warn!(error = %e, "failed to cancel abandoned query");
                }
            });
        }
    }
}

fn row_to_map(row: &PgRow) -> Result<Row, DbError> {
    let mut map = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| {
            DbError::Serialization(format!("column '{}': {}", column.name(), e))
        })?;
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

fn column_value(row: &PgRow, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Result<Option<T>, tokio_postgres::Error> {
        row.try_get::<_, Option<T>>(idx)
    }

    let value = if *ty == Type::BOOL {
        get::<bool>(row, idx)?.map(Value::from)
    } else if *ty == Type::INT2 {
        get::<i16>(row, idx)?.map(Value::from)
    } else if *ty == Type::INT4 {
        get::<i32>(row, idx)?.map(Value::from)
    } else if *ty == Type::INT8 {
        get::<i64>(row, idx)?.map(Value::from)
    } else if *ty == Type::OID {
        get::<u32>(row, idx)?.map(Value::from)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, idx)?.map(|v| Value::from(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, idx)?.map(Value::from)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get::<Value>(row, idx)?
    } else if *ty == Type::UUID {
        get::<Uuid>(row, idx)?.map(|v| Value::String(v.to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        get::<DateTime<Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339()))
    } else if *ty == Type::TIMESTAMP {
        get::<NaiveDateTime>(row, idx)?.map(|v| Value::String(v.to_string()))
    } else if *ty == Type::DATE {
        get::<NaiveDate>(row, idx)?.map(|v| Value::String(v.to_string()))
    } else if <String as FromSql<'_>>::accepts(ty) {
        get::<String>(row, idx)?.map(Value::String)
    } else {
        debug!(column = idx, ty = %ty, "unsupported column type, returning null");
        None
    };
    Ok(value.unwrap_or(Value::Null))
}

impl SqlValue {
    /// Whether this value has a binary encoding for a column of type `ty`
    fn binds_to(&self, ty: &Type) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(_) => *ty == Type::BOOL,
            Self::Int(_) => [
                Type::INT2,
                Type::INT4,
                Type::INT8,
                Type::OID,
                Type::FLOAT4,
                Type::FLOAT8
            ]
            .contains(ty),
            Self::Float(_) => *ty == Type::FLOAT4 || *ty == Type::FLOAT8,
            Self::Text(_) => *ty == Type::UUID || <&str as ToSql>::accepts(ty),
            Self::Json(_) => *ty == Type::JSON || *ty == Type::JSONB
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Self::Null => Ok(IsNull::Yes),
            Self::Bool(v) => v.to_sql(ty, out),
            Self::Int(v) => {
                if *ty == Type::INT2 {
                    i16::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::OID {
                    u32::try_from(*v)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*v as f64).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Float(v) => {
                if *ty == Type::FLOAT4 {
                    (*v as f32).to_sql(ty, out)
                } else {
                    v.to_sql(ty, out)
                }
            }
            Self::Text(v) => {
                if *ty == Type::UUID {
                    Uuid::parse_str(v)?.to_sql(ty, out)
                } else {
                    v.as_str().to_sql(ty, out)
                }
            }
            Self::Json(v) => v.to_sql(ty, out)
        }
    }

    // NULL binds to any column; the per-variant check happens below
    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn to_sql_checked(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if !self.binds_to(ty) {
            return Err(Box::new(WrongType::new::<Self>(ty.clone())));
        }
        self.to_sql(ty, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_binds_to_uuid_column() {
        let mut out = BytesMut::new();
        SqlValue::from("67e55044-10b1-426f-9247-bb680e5fe0c8")
            .to_sql_checked(&Type::UUID, &mut out)
            .unwrap();
        assert_eq!(out.len(), 16);

        let mut out = BytesMut::new();
        assert!(
            SqlValue::from("not-a-uuid")
                .to_sql_checked(&Type::UUID, &mut out)
                .is_err()
        );
    }

    #[test]
    fn mismatched_types_are_rejected_before_encoding() {
        let mut out = BytesMut::new();
        let err = SqlValue::Bool(true)
            .to_sql_checked(&Type::TEXT, &mut out)
            .unwrap_err();
        assert!(err.is::<WrongType>());
        assert!(out.is_empty());

        assert!(
            SqlValue::from("abc")
                .to_sql_checked(&Type::INT4, &mut out)
                .is_err()
        );
        assert!(
            SqlValue::Float(1.5)
                .to_sql_checked(&Type::INT8, &mut out)
                .is_err()
        );
        assert!(
            SqlValue::Json(serde_json::json!({"a": 1}))
                .to_sql_checked(&Type::TEXT, &mut out)
                .is_err()
        );
        assert!(out.is_empty());
    }

    #[test]
    fn matching_types_are_encoded() {
        let mut out = BytesMut::new();
        SqlValue::Bool(true)
            .to_sql_checked(&Type::BOOL, &mut out)
            .unwrap();
        SqlValue::Int(3)
            .to_sql_checked(&Type::FLOAT8, &mut out)
            .unwrap();
        SqlValue::from("abc")
            .to_sql_checked(&Type::VARCHAR, &mut out)
            .unwrap();
        let is_null = SqlValue::Null
            .to_sql_checked(&Type::INT4, &mut out)
            .unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert_eq!(out.len(), 1 + 8 + 3);
    }

    #[test]
    fn missing_root_cert_file_is_a_config_error() {
        let config = DatabaseConfig {
            ssl_root_cert: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        assert!(matches!(tls_connector(&config), Err(DbError::Config(_))));
    }

    #[test]
    fn default_roots_build_a_connector() {
        assert!(tls_connector(&DatabaseConfig::default()).is_ok());
    }

    #[test]
    fn int_narrows_to_column_width() {
        let mut out = BytesMut::new();
        SqlValue::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(out.len(), 4);

        let mut out = BytesMut::new();
        assert!(SqlValue::Int(i64::MAX).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn null_is_sent_as_sql_null() {
        let mut out = BytesMut::new();
        let is_null = SqlValue::Null.to_sql(&Type::TEXT, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
    }

    #[tokio::test]
    async fn missing_url_fails_fast() {
        let config = DatabaseConfig::default();
        let err = PostgresBackend::connect(&config).await.err().unwrap();
        assert!(matches!(err, DbError::Config(_)));
    }
}
