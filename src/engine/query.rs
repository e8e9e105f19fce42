//! Query façade
//!
//! Runs user SQL for a session. Failures come back inside the
//! `QueryResult` (`success: false`) together with the elapsed time; callers
//! never see an `Err` from here.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::session_manager::SessionManager;
use crate::engine::types::{QueryOutput, QueryResult, SessionId};
use crate::metrics;

pub struct QueryExecutor {
    sessions: Arc<SessionManager>,
    default_batch_size: u32,
}

impl QueryExecutor {
    pub fn new(sessions: Arc<SessionManager>, default_batch_size: u32) -> Self {
        Self {
            sessions,
            default_batch_size,
        }
    }

    pub fn default_batch_size(&self) -> u32 {
        self.default_batch_size
    }

    /// Runs SQL on the session's open transaction, or on a pooled
    /// connection when there is none.
    #[instrument(skip(self, sql), fields(session_id = %session_id, sql_len = sql.len()))]
    pub async fn execute(&self, session_id: SessionId, sql: &str) -> QueryResult {
        let start = Instant::now();
        let outcome = self.run(session_id, sql).await;
        Self::finish(outcome, start)
    }

    /// Reads a single batch of a query through a server-side cursor.
    ///
    /// Always uses a pooled connection, even while the session has an open
    /// transaction.
    #[instrument(skip(self, sql), fields(session_id = %session_id, sql_len = sql.len()))]
    pub async fn execute_streaming(
        &self,
        session_id: SessionId,
        sql: &str,
        batch_size: Option<u32>,
    ) -> QueryResult {
        let start = Instant::now();
        let batch_size = batch_size.unwrap_or(self.default_batch_size);
        let outcome = self.run_batch(session_id, sql, batch_size).await;
        metrics::record_streamed();
        Self::finish(outcome, start)
    }

    async fn run(&self, session_id: SessionId, sql: &str) -> EngineResult<QueryOutput> {
        if sql.trim().is_empty() {
            return Err(EngineError::validation("Query is empty"));
        }
        let route = self.sessions.route(session_id).await?;
        debug!(in_transaction = route.in_transaction(), "Executing query");
        route.query(sql, &[]).await
    }

    async fn run_batch(
        &self,
        session_id: SessionId,
        sql: &str,
        batch_size: u32,
    ) -> EngineResult<QueryOutput> {
        if sql.trim().is_empty() {
            return Err(EngineError::validation("Query is empty"));
        }
        if batch_size == 0 {
            return Err(EngineError::validation("Batch size must be at least 1"));
        }
        let pool = self.sessions.pool(session_id).await?;
        pool.fetch_batch(sql, batch_size).await
    }

    fn finish(outcome: EngineResult<QueryOutput>, start: Instant) -> QueryResult {
        let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
        metrics::record_query(execution_time_ms, outcome.is_ok());

        match outcome {
            Ok(output) => {
                debug!(
                    rows = output.rows.len(),
                    row_count = ?output.row_count,
                    execution_time_ms,
                    "Query finished"
                );
                QueryResult::from_output(output, execution_time_ms)
            }
            Err(err) => {
                warn!(error = %err, execution_time_ms, "Query failed");
                QueryResult::failure(&err, execution_time_ms)
            }
        }
    }
}
