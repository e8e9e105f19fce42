//! Query Commands
//!
//! SQL execution and plan retrieval. Execution failures come back inside
//! the `QueryResult`.

use serde::Serialize;

use crate::engine::types::{QueryPlan, QueryResult, SessionId};
use crate::AppState;

/// Executes SQL on the session (or its open transaction)
pub async fn execute_query(state: &AppState, session_id: String, sql: String) -> QueryResult {
    match SessionId::parse(&session_id) {
        Ok(session_id) => state.queries.execute(session_id, &sql).await,
        Err(e) => QueryResult::failure(&e, 0.0),
    }
}

/// Reads the first batch of a query through a server-side cursor
pub async fn execute_query_streaming(
    state: &AppState,
    session_id: String,
    sql: String,
    batch_size: Option<u32>,
) -> QueryResult {
    match SessionId::parse(&session_id) {
        Ok(session_id) => {
            state
                .queries
                .execute_streaming(session_id, &sql, batch_size)
                .await
        }
        Err(e) => QueryResult::failure(&e, 0.0),
    }
}

/// Response wrapper for `EXPLAIN` output
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub success: bool,
    pub plan: Option<QueryPlan>,
    pub error: Option<String>,
}

pub async fn get_query_plan(state: &AppState, session_id: String, sql: String) -> PlanResponse {
    let result = match SessionId::parse(&session_id) {
        Ok(session_id) => state.plans.explain(session_id, &sql).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(plan) => PlanResponse {
            success: true,
            plan: Some(plan),
            error: None,
        },
        Err(e) => PlanResponse {
            success: false,
            plan: None,
            error: Some(e.to_string()),
        },
    }
}
