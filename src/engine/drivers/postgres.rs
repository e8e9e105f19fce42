//! PostgreSQL Driver
//!
//! Implements the DataEngine trait for PostgreSQL databases using SQLx.
//!
//! ## Transaction Handling
//!
//! `begin()` checks a connection out of the session pool and keeps it inside
//! a `sqlx::Transaction` until commit or rollback. Dropping an unfinished
//! transaction rolls it back and returns the connection to the pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode, Postgres};
use sqlx::{ConnectOptions, Either, Executor, Transaction};
use tracing::{info, instrument, warn};

use crate::config::PoolSettings;
use crate::engine::drivers::postgres_utils::{
    bind_param, convert_row, describe_fields, fields_of, map_connect_error, map_statement_error,
};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::statement;
use crate::engine::traits::{DataEngine, PoolHandle, TransactionHandle};
use crate::engine::types::{ConnectionProfile, FieldInfo, QueryOutput, Row as QRow, Value};

const APPLICATION_NAME: &str = "pgdesk";
const TEST_TIMEOUT_SECS: u64 = 10;
const CURSOR_NAME: &str = "pgdesk_cursor";

/// PostgreSQL driver implementation
pub struct PostgresDriver {
    defaults: PoolSettings,
}

impl PostgresDriver {
    pub fn new(defaults: PoolSettings) -> Self {
        Self { defaults }
    }

    /// Builds connect options from a profile
    fn connect_options(profile: &ConnectionProfile) -> PgConnectOptions {
        let ssl_mode = match (profile.ssl, profile.ssl_accept_invalid_certs) {
            (false, _) => PgSslMode::Disable,
            (true, false) => PgSslMode::VerifyFull,
            (true, true) => PgSslMode::Require,
        };

        let mut options = PgConnectOptions::new()
            .host(&profile.host)
            .port(profile.port)
            .username(&profile.username)
            .database(&profile.database)
            .ssl_mode(ssl_mode)
            .application_name(APPLICATION_NAME);
        if !profile.password.is_empty() {
            options = options.password(profile.password.expose());
        }
        options.disable_statement_logging()
    }

    fn pool_settings(&self, profile: &ConnectionProfile) -> PoolSettings {
        PoolSettings {
            max_connections: profile
                .pool_max_connections
                .filter(|n| *n > 0)
                .unwrap_or(self.defaults.max_connections),
            connect_timeout_secs: profile
                .pool_connect_timeout_secs
                .filter(|n| *n > 0)
                .map(u64::from)
                .unwrap_or(self.defaults.connect_timeout_secs),
            idle_timeout_secs: profile
                .pool_idle_timeout_secs
                .map(u64::from)
                .unwrap_or(self.defaults.idle_timeout_secs),
        }
    }

    /// Loads the cloud service-account key, if configured. Failures are only
    /// logged; the connection itself always goes to host/port.
    async fn check_cloud_credentials(profile: &ConnectionProfile) {
        let Some(cloud) = profile.cloud.as_ref() else {
            return;
        };
        let Some(path) = cloud.service_account_key_path.as_deref() else {
            return;
        };

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read service account key");
                return;
            }
        };
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(key) => info!(
                project_id = ?cloud.project_id,
                instance = ?cloud.instance_name,
                client_email = key.get("client_email").and_then(|v| v.as_str()).unwrap_or("unknown"),
                "Loaded service account key"
            ),
            Err(e) => warn!(path = %path, error = %e, "Service account key is not valid JSON"),
        }
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new(PoolSettings::default())
    }
}

#[async_trait]
impl DataEngine for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["postgresql", "pg"]
    }

    async fn test_connection(&self, profile: &ConnectionProfile) -> EngineResult<()> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(TEST_TIMEOUT_SECS))
            .connect_with(Self::connect_options(profile))
            .await
            .map_err(|e| map_connect_error(e, TEST_TIMEOUT_SECS * 1000))?;

        let result = sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map(|_| ())
            .map_err(map_statement_error);

        pool.close().await;
        result
    }

    #[instrument(
        skip(self, profile),
        fields(host = %profile.host, port = profile.port, database = %profile.database)
    )]
    async fn open(&self, profile: &ConnectionProfile) -> EngineResult<Arc<dyn PoolHandle>> {
        Self::check_cloud_credentials(profile).await;

        let settings = self.pool_settings(profile);
        let timeout_ms = settings.connect_timeout_secs * 1000;

        let mut pool_options = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs));
        if settings.idle_timeout_secs > 0 {
            pool_options = pool_options.idle_timeout(Duration::from_secs(settings.idle_timeout_secs));
        }

        let pool = pool_options
            .connect_with(Self::connect_options(profile))
            .await
            .map_err(|e| map_connect_error(e, timeout_ms))?;

        let version: Result<(String,), _> = sqlx::query_as("SELECT version()").fetch_one(&pool).await;
        match version {
            Ok((version,)) => info!(server_version = %version, "Connected to PostgreSQL"),
            Err(e) => {
                pool.close().await;
                return Err(map_connect_error(e, timeout_ms));
            }
        }

        Ok(Arc::new(PgPoolHandle { pool, timeout_ms }))
    }
}

/// Pool handle backed by a `PgPool`
pub struct PgPoolHandle {
    pool: PgPool,
    timeout_ms: u64,
}

#[async_trait]
impl PoolHandle for PgPoolHandle {
    async fn query(&self, sql: &str, params: &[Value]) -> EngineResult<QueryOutput> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_connect_error(e, self.timeout_ms))?;
        run_query(&mut conn, sql, params).await
    }

    async fn fetch_batch(&self, sql: &str, batch_size: u32) -> EngineResult<QueryOutput> {
        if !statement::is_single_query(sql) {
            return Err(EngineError::validation(
                "Streaming requires a single SELECT statement",
            ));
        }
        let sql = statement::strip_trailing_semicolons(sql);

        let mut tx: Transaction<'static, Postgres> = self
            .pool
            .begin()
            .await
            .map_err(|e| map_connect_error(e, self.timeout_ms))?;

        let declare = format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {sql}");
        (&mut *tx).execute(declare.as_str()).await.map_err(map_statement_error)?;

        let fetch = format!("FETCH FORWARD {} FROM {CURSOR_NAME}", batch_size.max(1));
        let mut output = run_query(&mut tx, &fetch, &[]).await?;
        if output.fields.is_empty() {
            output.fields = describe_fields(&mut tx, sql).await?;
        }

        let close = format!("CLOSE {CURSOR_NAME}");
        (&mut *tx).execute(close.as_str()).await.map_err(map_statement_error)?;
        tx.commit().await.map_err(map_statement_error)?;

        Ok(output)
    }

    async fn begin(&self) -> EngineResult<Box<dyn TransactionHandle>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_connect_error(e, self.timeout_ms))?;
        Ok(Box::new(PgTransactionHandle { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn size(&self) -> u32 {
        self.pool.size()
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// A transaction pinned to one pooled connection
pub struct PgTransactionHandle {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionHandle for PgTransactionHandle {
    async fn query(&mut self, sql: &str, params: &[Value]) -> EngineResult<QueryOutput> {
        run_query(&mut self.tx, sql, params).await
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| EngineError::transaction_error(format!("Failed to commit transaction: {e}")))
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| EngineError::transaction_error(format!("Failed to rollback transaction: {e}")))
    }
}

/// Runs SQL on one connection.
///
/// Without parameters the simple query protocol is used, so scripts with
/// several statements work. The reported result set is the last one that
/// produced rows; `row_count` is the command tag count of the last statement.
async fn run_query(conn: &mut PgConnection, sql: &str, params: &[Value]) -> EngineResult<QueryOutput> {
    let mut fields: Vec<FieldInfo> = Vec::new();
    let mut rows: Vec<QRow> = Vec::new();
    let mut row_count: Option<u64> = None;
    {
        let mut stream = if params.is_empty() {
            (&mut *conn).fetch_many(sql)
        } else {
            let query = params
                .iter()
                .fold(sqlx::query(sql), |query, value| bind_param(query, value));
            (&mut *conn).fetch_many(query)
        };

        let mut pending_fields: Vec<FieldInfo> = Vec::new();
        let mut pending_rows: Vec<QRow> = Vec::new();
        while let Some(item) = stream.next().await {
            match item.map_err(map_statement_error)? {
                Either::Left(done) => {
                    row_count = Some(done.rows_affected());
                    if !pending_rows.is_empty() {
                        fields = std::mem::take(&mut pending_fields);
                        rows = std::mem::take(&mut pending_rows);
                    }
                }
                Either::Right(pg_row) => {
                    if pending_rows.is_empty() {
                        pending_fields = fields_of(&pg_row);
                    }
                    pending_rows.push(convert_row(&pg_row));
                }
            }
        }
        // A trailing result set without a command tag still counts
        if !pending_rows.is_empty() {
            fields = pending_fields;
            rows = pending_rows;
        }
    }

    if rows.is_empty()
        && statement::statement_count(sql) == Some(1)
        && statement::returns_rows(sql)
    {
        fields = describe_fields(conn, sql).await?;
    }

    Ok(QueryOutput {
        fields,
        rows,
        row_count,
    })
}
