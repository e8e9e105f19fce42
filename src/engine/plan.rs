//! Plan façade: `EXPLAIN (FORMAT JSON, ANALYZE, BUFFERS, VERBOSE)`.
//!
//! ANALYZE executes the statement. Inside an open transaction the side
//! effects stay inside that transaction.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::session_manager::SessionManager;
use crate::engine::statement::strip_trailing_semicolons;
use crate::engine::types::{QueryOutput, QueryPlan, SessionId, Value};
use crate::metrics;

const PLAN_COLUMN: &str = "QUERY PLAN";

pub struct PlanService {
    sessions: Arc<SessionManager>,
}

impl PlanService {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    pub fn explain_sql(sql: &str) -> EngineResult<String> {
        let body = strip_trailing_semicolons(sql).trim();
        if body.is_empty() {
            return Err(EngineError::validation("Query is empty"));
        }
        Ok(format!("EXPLAIN (FORMAT JSON, ANALYZE, BUFFERS, VERBOSE) {body}"))
    }

    #[instrument(skip(self, sql), fields(session_id = %session_id, sql_len = sql.len()))]
    pub async fn explain(&self, session_id: SessionId, sql: &str) -> EngineResult<QueryPlan> {
        let start = Instant::now();
        let explain = Self::explain_sql(sql)?;
        let route = self.sessions.route(session_id).await?;
        let output = route.query(&explain, &[]).await?;
        let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
        metrics::record_explain();

        let plan_tree = plan_tree(output)?;
        debug!(execution_time_ms, "Plan fetched");
        Ok(QueryPlan {
            plan_tree,
            execution_time_ms,
        })
    }
}

/// The `QUERY PLAN` cell of the first row, or every row as a JSON array
fn plan_tree(output: QueryOutput) -> EngineResult<serde_json::Value> {
    if let Some(first) = output.rows.first() {
        match first.get(PLAN_COLUMN) {
            Some(Value::Json(tree)) => return Ok(tree.clone()),
            Some(Value::Text(raw)) => {
                if let Ok(tree) = serde_json::from_str(raw) {
                    return Ok(tree);
                }
            }
            _ => {}
        }
    }
    serde_json::to_value(&output.rows)
        .map_err(|e| EngineError::internal(format!("Failed to encode plan rows: {e}")))
}
