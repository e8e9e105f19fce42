//! Connection Commands
//!
//! Commands for opening, testing and closing database sessions.

use serde::Serialize;
use tracing::warn;

use crate::engine::types::{ConnectionProfile, SessionId, SessionInfo};
use crate::engine::EngineError;
use crate::AppState;

/// Response for connection operations
#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub success: bool,
    pub session_id: Option<String>,
    pub error: Option<String>,
}

impl ConnectionResponse {
    fn ok(session_id: Option<SessionId>) -> Self {
        Self {
            success: true,
            session_id: session_id.map(|id| id.to_string()),
            error: None,
        }
    }

    fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            session_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Tests a database connection without persisting it
pub async fn test_connection(state: &AppState, profile: ConnectionProfile) -> ConnectionResponse {
    match state.session_manager.test_connection(&profile).await {
        Ok(()) => ConnectionResponse::ok(None),
        Err(e) => ConnectionResponse::err(e),
    }
}

/// Establishes a new database connection
pub async fn connect(state: &AppState, profile: ConnectionProfile) -> ConnectionResponse {
    match state.session_manager.connect(profile).await {
        Ok(session_id) => ConnectionResponse::ok(Some(session_id)),
        Err(e) => ConnectionResponse::err(e),
    }
}

/// Establishes a new database connection from a saved profile
pub async fn connect_saved(state: &AppState, profile_id: String) -> ConnectionResponse {
    let profile = match state.profiles.get(&profile_id) {
        Ok(Some(profile)) => profile,
        Ok(None) => {
            return ConnectionResponse::err(format!("Connection profile not found: {}", profile_id))
        }
        Err(e) => {
            warn!(profile_id = %profile_id, error = %e, "Failed to load saved profile");
            return ConnectionResponse::err(e);
        }
    };

    connect(state, profile).await
}

/// Disconnects an active session
pub async fn disconnect(state: &AppState, session_id: String) -> ConnectionResponse {
    let session_id = match SessionId::parse(&session_id) {
        Ok(id) => id,
        Err(e) => return ConnectionResponse::err(e),
    };

    match state.session_manager.disconnect(session_id).await {
        Ok(()) => ConnectionResponse::ok(None),
        Err(e) => ConnectionResponse::err(e),
    }
}

/// Lists all active sessions, oldest first
pub async fn list_sessions(state: &AppState) -> Vec<SessionInfo> {
    state.session_manager.list_sessions().await
}

/// Response for transaction operations
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub error: Option<String>,
}

impl TransactionResponse {
    fn from_result(result: Result<Option<String>, EngineError>) -> Self {
        match result {
            Ok(transaction_id) => Self {
                success: true,
                transaction_id,
                error: None,
            },
            Err(e) => Self {
                success: false,
                transaction_id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Starts a transaction on the session; later statements run on it
pub async fn begin_transaction(state: &AppState, session_id: String) -> TransactionResponse {
    let result = async {
        let session_id = SessionId::parse(&session_id)?;
        let transaction_id = state.session_manager.begin_transaction(session_id).await?;
        Ok(Some(transaction_id.to_string()))
    }
    .await;
    TransactionResponse::from_result(result)
}

pub async fn commit_transaction(
    state: &AppState,
    session_id: String,
    transaction_id: String,
) -> TransactionResponse {
    finish_transaction(state, session_id, transaction_id, true).await
}

pub async fn rollback_transaction(
    state: &AppState,
    session_id: String,
    transaction_id: String,
) -> TransactionResponse {
    finish_transaction(state, session_id, transaction_id, false).await
}

async fn finish_transaction(
    state: &AppState,
    session_id: String,
    transaction_id: String,
    commit: bool,
) -> TransactionResponse {
    let result = async {
        let session_id = SessionId::parse(&session_id)?;
        let transaction_id = crate::engine::types::TransactionId::parse(&transaction_id)?;
        if commit {
            state.session_manager.commit(session_id, transaction_id).await?;
        } else {
            state.session_manager.rollback(session_id, transaction_id).await?;
        }
        Ok(None)
    }
    .await;
    TransactionResponse::from_result(result)
}
