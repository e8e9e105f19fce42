//! NDJSON boundary
//!
//! Requests arrive one per line as `{"id": 7, "command": "execute_query", ...}`
//! and are answered with `{"id": 7, "result": ...}`. Lines that cannot be
//! decoded get `{"id": 7 | null, "error": "..."}`. Session events are pushed
//! as `{"event": {...}}`. Requests run concurrently, so responses may come
//! back out of order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::commands;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::ConnectionProfile;
use crate::engine::SessionEvent;
use crate::settings::AppSettings;
use crate::vault::ProfileUpdate;
use crate::{AppState, SharedState};

/// Every command the backend understands, tagged by `command`
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    TestConnection {
        profile: ConnectionProfile,
    },
    Connect {
        profile: ConnectionProfile,
    },
    ConnectSaved {
        profile_id: String,
    },
    Disconnect {
        session_id: String,
    },
    ListSessions,
    BeginTransaction {
        session_id: String,
    },
    CommitTransaction {
        session_id: String,
        transaction_id: String,
    },
    RollbackTransaction {
        session_id: String,
        transaction_id: String,
    },
    ExecuteQuery {
        session_id: String,
        sql: String,
    },
    ExecuteQueryStreaming {
        session_id: String,
        sql: String,
        #[serde(default)]
        batch_size: Option<u32>,
    },
    ListDatabases {
        session_id: String,
    },
    ListSchemas {
        session_id: String,
        #[serde(default)]
        database: String,
    },
    ListTables {
        session_id: String,
        #[serde(default)]
        database: String,
        schema: String,
    },
    ListColumns {
        session_id: String,
        #[serde(default)]
        database: String,
        schema: String,
        table: String,
    },
    ListIndexes {
        session_id: String,
        #[serde(default)]
        database: String,
        schema: String,
        table: String,
    },
    ListForeignKeys {
        session_id: String,
        #[serde(default)]
        database: String,
        schema: String,
        table: String,
    },
    ListConstraints {
        session_id: String,
        #[serde(default)]
        database: String,
        schema: String,
        table: String,
    },
    GetQueryPlan {
        session_id: String,
        sql: String,
    },
    ListProfiles,
    GetProfile {
        id: String,
    },
    SaveProfile {
        profile: ConnectionProfile,
    },
    UpdateProfile {
        id: String,
        changes: ProfileUpdate,
    },
    DeleteProfile {
        id: String,
    },
    LoadSettings,
    SaveSettings {
        settings: AppSettings,
    },
    ListDrivers,
    GetMetrics,
    ExportLogs,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::TestConnection { .. } => "test_connection",
            Command::Connect { .. } => "connect",
            Command::ConnectSaved { .. } => "connect_saved",
            Command::Disconnect { .. } => "disconnect",
            Command::ListSessions => "list_sessions",
            Command::BeginTransaction { .. } => "begin_transaction",
            Command::CommitTransaction { .. } => "commit_transaction",
            Command::RollbackTransaction { .. } => "rollback_transaction",
            Command::ExecuteQuery { .. } => "execute_query",
            Command::ExecuteQueryStreaming { .. } => "execute_query_streaming",
            Command::ListDatabases { .. } => "list_databases",
            Command::ListSchemas { .. } => "list_schemas",
            Command::ListTables { .. } => "list_tables",
            Command::ListColumns { .. } => "list_columns",
            Command::ListIndexes { .. } => "list_indexes",
            Command::ListForeignKeys { .. } => "list_foreign_keys",
            Command::ListConstraints { .. } => "list_constraints",
            Command::GetQueryPlan { .. } => "get_query_plan",
            Command::ListProfiles => "list_profiles",
            Command::GetProfile { .. } => "get_profile",
            Command::SaveProfile { .. } => "save_profile",
            Command::UpdateProfile { .. } => "update_profile",
            Command::DeleteProfile { .. } => "delete_profile",
            Command::LoadSettings => "load_settings",
            Command::SaveSettings { .. } => "save_settings",
            Command::ListDrivers => "list_drivers",
            Command::GetMetrics => "get_metrics",
            Command::ExportLogs => "export_logs",
        }
    }
}

/// One outgoing line
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Result { id: u64, result: JsonValue },
    Error { id: Option<u64>, error: String },
    Event { event: SessionEvent },
}

impl Outgoing {
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "id": null, "error": format!("Failed to encode response: {}", e) })
                .to_string()
        })
    }
}

fn encode<T: Serialize>(response: T) -> EngineResult<JsonValue> {
    serde_json::to_value(response)
        .map_err(|e| EngineError::internal(format!("Failed to encode response: {}", e)))
}

/// Runs one command against the state
#[instrument(skip_all, fields(command = command.name()))]
pub async fn dispatch(state: &AppState, command: Command) -> EngineResult<JsonValue> {
    use commands::{catalog, connection, driver, logs, metrics, profiles, query, settings};

    match command {
        Command::TestConnection { profile } => encode(connection::test_connection(state, profile).await),
        Command::Connect { profile } => encode(connection::connect(state, profile).await),
        Command::ConnectSaved { profile_id } => encode(connection::connect_saved(state, profile_id).await),
        Command::Disconnect { session_id } => encode(connection::disconnect(state, session_id).await),
        Command::ListSessions => encode(connection::list_sessions(state).await),
        Command::BeginTransaction { session_id } => {
            encode(connection::begin_transaction(state, session_id).await)
        }
        Command::CommitTransaction {
            session_id,
            transaction_id,
        } => encode(connection::commit_transaction(state, session_id, transaction_id).await),
        Command::RollbackTransaction {
            session_id,
            transaction_id,
        } => encode(connection::rollback_transaction(state, session_id, transaction_id).await),
        Command::ExecuteQuery { session_id, sql } => {
            encode(query::execute_query(state, session_id, sql).await)
        }
        Command::ExecuteQueryStreaming {
            session_id,
            sql,
            batch_size,
        } => encode(query::execute_query_streaming(state, session_id, sql, batch_size).await),
        Command::ListDatabases { session_id } => encode(catalog::list_databases(state, session_id).await),
        Command::ListSchemas {
            session_id,
            database,
        } => encode(catalog::list_schemas(state, session_id, database).await),
        Command::ListTables {
            session_id,
            database,
            schema,
        } => encode(catalog::list_tables(state, session_id, database, schema).await),
        Command::ListColumns {
            session_id,
            database,
            schema,
            table,
        } => encode(catalog::list_columns(state, session_id, database, schema, table).await),
        Command::ListIndexes {
            session_id,
            database,
            schema,
            table,
        } => encode(catalog::list_indexes(state, session_id, database, schema, table).await),
        Command::ListForeignKeys {
            session_id,
            database,
            schema,
            table,
        } => encode(catalog::list_foreign_keys(state, session_id, database, schema, table).await),
        Command::ListConstraints {
            session_id,
            database,
            schema,
            table,
        } => encode(catalog::list_constraints(state, session_id, database, schema, table).await),
        Command::GetQueryPlan { session_id, sql } => {
            encode(query::get_query_plan(state, session_id, sql).await)
        }
        Command::ListProfiles => encode(profiles::list_profiles(state).await),
        Command::GetProfile { id } => encode(profiles::get_profile(state, id).await),
        Command::SaveProfile { profile } => encode(profiles::save_profile(state, profile).await),
        Command::UpdateProfile { id, changes } => {
            encode(profiles::update_profile(state, id, changes).await)
        }
        Command::DeleteProfile { id } => encode(profiles::delete_profile(state, id).await),
        Command::LoadSettings => encode(settings::load_settings(state).await),
        Command::SaveSettings { settings: values } => {
            encode(settings::save_settings(state, values).await)
        }
        Command::ListDrivers => encode(driver::list_drivers(state).await),
        Command::GetMetrics => encode(metrics::get_metrics().await),
        Command::ExportLogs => encode(logs::export_logs(state).await),
    }
}

/// Decodes a request line into its id and command
pub fn decode_request(line: &str) -> Result<(u64, Command), (Option<u64>, String)> {
    let mut value: JsonValue =
        serde_json::from_str(line).map_err(|e| (None, format!("Invalid JSON: {}", e)))?;

    let object = value
        .as_object_mut()
        .ok_or_else(|| (None, "Request must be a JSON object".to_string()))?;
    let id = object.remove("id").and_then(|id| id.as_u64());
    let Some(id) = id else {
        return Err((None, "Request is missing a numeric \"id\"".to_string()));
    };

    let command = Command::deserialize(value).map_err(|e| (Some(id), format!("Invalid request: {}", e)))?;
    Ok((id, command))
}

/// Handles one request line. Blank lines produce no output.
pub async fn handle_line(state: &AppState, line: &str) -> Option<Outgoing> {
    if line.trim().is_empty() {
        return None;
    }

    let outgoing = match decode_request(line) {
        Ok((id, command)) => match dispatch(state, command).await {
            Ok(result) => Outgoing::Result { id, result },
            Err(e) => Outgoing::Error {
                id: Some(id),
                error: e.to_string(),
            },
        },
        Err((id, error)) => {
            warn!(error = %error, "Rejected request line");
            Outgoing::Error { id, error }
        }
    };
    Some(outgoing)
}

/// Pushes session events to the writer until `shutdown` fires, then flushes
/// whatever is still buffered.
async fn forward_events(
    mut events: broadcast::Receiver<SessionEvent>,
    tx: mpsc::UnboundedSender<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let send = |event: SessionEvent| tx.send(Outgoing::Event { event }.to_line()).is_ok();

    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => {
                    if !send(event) {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped session events");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut shutdown => break,
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => {
                if !send(event) {
                    return;
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Dropped session events");
            }
            Err(_) => return,
        }
    }
}

/// Serves requests from `input` until EOF, writing responses and events to
/// `output`. All sessions are disconnected before returning.
pub async fn serve<R, W>(state: SharedState, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let events = state.session_manager.subscribe();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let event_forwarder = tokio::spawn(forward_events(events, tx.clone(), shutdown_rx));

    let mut in_flight = JoinSet::new();
    let mut lines = input.lines();
    let read_result = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let state = Arc::clone(&state);
                let tx = tx.clone();
                in_flight.spawn(async move {
                    if let Some(outgoing) = handle_line(&state, &line).await {
                        let _ = tx.send(outgoing.to_line());
                    }
                });
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
        // Reap finished requests
        while in_flight.try_join_next().is_some() {}
    };

    debug!(pending = in_flight.len(), "Input closed, draining requests");
    while in_flight.join_next().await.is_some() {}

    info!("Shutting down, disconnecting all sessions");
    state.session_manager.disconnect_all().await;

    // Shutdown events are already buffered; the forwarder flushes them
    let _ = shutdown_tx.send(());
    if let Err(e) = event_forwarder.await {
        warn!(error = %e, "Event forwarder failed");
    }
    drop(tx);

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Output stream failed"),
        Err(e) => warn!(error = %e, "Writer task failed"),
    }
    read_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_state;
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let (id, command) = decode_request(r#"{"id": 3, "command": "list_sessions"}"#).unwrap();
        assert_eq!(id, 3);
        assert!(matches!(command, Command::ListSessions));

        let (_, command) = decode_request(
            r#"{"id": 4, "command": "execute_query_streaming", "session_id": "s", "sql": "SELECT 1"}"#,
        )
        .unwrap();
        assert!(matches!(
            command,
            Command::ExecuteQueryStreaming { batch_size: None, .. }
        ));
    }

    #[test]
    fn test_decode_errors_carry_id_when_known() {
        assert_eq!(decode_request("not json").unwrap_err().0, None);
        assert_eq!(decode_request(r#"{"command": "list_sessions"}"#).unwrap_err().0, None);

        let (id, error) = decode_request(r#"{"id": 9, "command": "drop_everything"}"#).unwrap_err();
        assert_eq!(id, Some(9));
        assert!(error.starts_with("Invalid request"));

        let (id, _) = decode_request(r#"{"id": 10, "command": "execute_query"}"#).unwrap_err();
        assert_eq!(id, Some(10));
    }

    #[test]
    fn test_outgoing_shapes() {
        let line = Outgoing::Result { id: 1, result: json!({"success": true}) }.to_line();
        assert_eq!(line, r#"{"id":1,"result":{"success":true}}"#);

        let line = Outgoing::Error { id: None, error: "bad".into() }.to_line();
        assert_eq!(line, r#"{"id":null,"error":"bad"}"#);

        let line = Outgoing::Event {
            event: SessionEvent::Disconnected { session_id: "s".into() },
        }
        .to_line();
        assert_eq!(line, r#"{"event":{"type":"disconnected","session_id":"s"}}"#);
    }

    #[tokio::test]
    async fn test_shutdown_events_reach_the_output() {
        let (state, _driver, _dir) = memory_state();
        let state = Arc::new(state);
        let session_id = state
            .session_manager
            .connect(crate::test_support::memory_profile())
            .await
            .unwrap();
        let tx_id = state.session_manager.begin_transaction(session_id).await.unwrap();

        let (client_in, server_in) = tokio::io::duplex(1024);
        let (server_out, client_out) = tokio::io::duplex(64 * 1024);
        drop(client_in);
        serve(Arc::clone(&state), tokio::io::BufReader::new(server_in), server_out)
            .await
            .unwrap();

        let mut lines = tokio::io::BufReader::new(client_out).lines();
        let mut events = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            let value: JsonValue = serde_json::from_str(&line).unwrap();
            events.push(value["event"].clone());
        }

        assert!(events.contains(&json!({
            "type": "transaction_finished",
            "session_id": session_id.to_string(),
            "transaction_id": tx_id.to_string(),
            "committed": false
        })));
        assert!(events.contains(&json!({
            "type": "disconnected",
            "session_id": session_id.to_string()
        })));
    }

    #[tokio::test]
    async fn test_handle_line_dispatches() {
        let (state, _driver, _dir) = memory_state();

        assert!(handle_line(&state, "   ").await.is_none());

        let outgoing = handle_line(&state, r#"{"id": 1, "command": "list_drivers"}"#)
            .await
            .unwrap();
        let value = serde_json::to_value(&outgoing).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["success"], true);
        assert_eq!(value["result"]["drivers"][0]["id"], "memory");
    }
}
