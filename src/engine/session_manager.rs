//! Session Manager
//!
//! Centralized management of all active database sessions and their open
//! transactions. This is the SINGLE SOURCE OF TRUTH for connection state:
//! the façades only look sessions up here, they never keep their own handles.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{info, instrument, warn};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::{PoolHandle, TransactionHandle};
use crate::engine::types::{
    ConnectionProfile, QueryOutput, SessionId, SessionInfo, TransactionId, Value,
};
use crate::engine::DriverRegistry;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications, forwarded to the UI as `{"event": ...}` lines
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected {
        session_id: String,
        display_name: String,
    },
    ConnectionFailed {
        display_name: String,
        error: String,
    },
    Disconnected {
        session_id: String,
    },
    TransactionStarted {
        session_id: String,
        transaction_id: String,
    },
    TransactionFinished {
        session_id: String,
        transaction_id: String,
        committed: bool,
    },
}

/// Active session with its connection pool
pub struct ActiveSession {
    pub engine: String,
    /// Snapshot taken at connect time
    pub profile: ConnectionProfile,
    pub display_name: String,
    pub pool: Arc<dyn PoolHandle>,
    pub created_at: DateTime<Utc>,
    pub transaction: Option<TransactionId>,
}

impl ActiveSession {
    fn info(&self, id: SessionId) -> SessionInfo {
        SessionInfo {
            id: id.to_string(),
            display_name: self.display_name.clone(),
            engine: self.engine.clone(),
            database: self.profile.database.clone(),
            created_at: self.created_at,
            in_transaction: self.transaction.is_some(),
        }
    }
}

/// An open transaction and the connection it holds.
///
/// Statements on one transaction are serialized by the connection mutex.
pub struct ActiveTransaction {
    pub id: TransactionId,
    pub session_id: SessionId,
    conn: Mutex<Option<Box<dyn TransactionHandle>>>,
}

impl ActiveTransaction {
    fn new(id: TransactionId, session_id: SessionId, handle: Box<dyn TransactionHandle>) -> Self {
        Self {
            id,
            session_id,
            conn: Mutex::new(Some(handle)),
        }
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> EngineResult<QueryOutput> {
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(handle) => handle.query(sql, params).await,
            None => Err(EngineError::transaction_not_found(self.id.to_string())),
        }
    }

    /// Takes the connection out once any running statement has finished
    async fn take(&self) -> Option<Box<dyn TransactionHandle>> {
        self.conn.lock().await.take()
    }
}

/// Where a statement for a session should run
#[derive(Clone)]
pub enum Route {
    Pool(Arc<dyn PoolHandle>),
    Transaction(Arc<ActiveTransaction>),
}

impl Route {
    pub async fn query(&self, sql: &str, params: &[Value]) -> EngineResult<QueryOutput> {
        match self {
            Route::Pool(pool) => pool.query(sql, params).await,
            Route::Transaction(tx) => tx.query(sql, params).await,
        }
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self, Route::Transaction(_))
    }
}

#[derive(Default)]
struct SessionMaps {
    sessions: HashMap<SessionId, ActiveSession>,
    transactions: HashMap<TransactionId, Arc<ActiveTransaction>>,
}

/// Manages all active database sessions
pub struct SessionManager {
    registry: Arc<DriverRegistry>,
    maps: RwLock<SessionMaps>,
    events: broadcast::Sender<SessionEvent>,
    connect_timeout_ms: u64,
}

impl SessionManager {
    const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;
    const TEST_TIMEOUT_MS: u64 = 10_000;

    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self::with_connect_timeout(registry, Duration::from_millis(Self::DEFAULT_CONNECT_TIMEOUT_MS))
    }

    pub fn with_connect_timeout(registry: Arc<DriverRegistry>, connect_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registry,
            maps: RwLock::new(SessionMaps::default()),
            events,
            connect_timeout_ms: connect_timeout.as_millis() as u64,
        }
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    /// Receives session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Tests a connection without persisting it
    #[instrument(
        skip(self, profile),
        fields(engine = %profile.engine, host = %profile.host, port = profile.port, database = %profile.database)
    )]
    pub async fn test_connection(&self, profile: &ConnectionProfile) -> EngineResult<()> {
        profile.validate()?;
        let driver = self.registry.resolve(&profile.engine)?;

        match timeout(
            Duration::from_millis(Self::TEST_TIMEOUT_MS),
            driver.test_connection(profile),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                timeout_ms: Self::TEST_TIMEOUT_MS,
            }),
        }
    }

    /// Establishes a new connection and returns its session ID
    #[instrument(
        skip(self, profile),
        fields(engine = %profile.engine, host = %profile.host, port = profile.port, database = %profile.database)
    )]
    pub async fn connect(&self, profile: ConnectionProfile) -> EngineResult<SessionId> {
        profile.validate()?;
        let driver = self.registry.resolve(&profile.engine)?;
        let display_name = profile.display_name();

        let opened = match timeout(
            Duration::from_millis(self.connect_timeout_ms),
            driver.open(&profile),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                timeout_ms: self.connect_timeout_ms,
            }),
        };

        let pool = match opened {
            Ok(pool) => pool,
            Err(err) => {
                warn!(error = %err, "Connection failed");
                self.emit(SessionEvent::ConnectionFailed {
                    display_name,
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let session_id = SessionId::new();
        let session = ActiveSession {
            engine: driver.driver_id().to_string(),
            profile,
            display_name: display_name.clone(),
            pool,
            created_at: Utc::now(),
            transaction: None,
        };
        self.maps.write().await.sessions.insert(session_id, session);

        info!(session_id = %session_id, "Session opened");
        self.emit(SessionEvent::Connected {
            session_id: session_id.to_string(),
            display_name,
        });
        Ok(session_id)
    }

    /// Disconnects a session
    ///
    /// An open transaction is rolled back and released before the pool is
    /// closed. A failed rollback is logged and does not stop the disconnect.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn disconnect(&self, session_id: SessionId) -> EngineResult<()> {
        let (session, transaction) = {
            let mut maps = self.maps.write().await;
            let session = maps
                .sessions
                .remove(&session_id)
                .ok_or_else(|| EngineError::session_not_found(session_id.to_string()))?;
            let transaction = session
                .transaction
                .and_then(|tx_id| maps.transactions.remove(&tx_id));
            (session, transaction)
        };

        if let Some(transaction) = transaction {
            if let Some(handle) = transaction.take().await {
                match handle.rollback().await {
                    Ok(()) => info!(transaction_id = %transaction.id, "Rolled back open transaction"),
                    Err(e) => warn!(
                        transaction_id = %transaction.id,
                        error = %e,
                        "Rollback during disconnect failed"
                    ),
                }
            }
            self.emit(SessionEvent::TransactionFinished {
                session_id: session_id.to_string(),
                transaction_id: transaction.id.to_string(),
                committed: false,
            });
        }

        session.pool.close().await;
        info!("Session closed");
        self.emit(SessionEvent::Disconnected {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Disconnects every session. Used at shutdown.
    pub async fn disconnect_all(&self) {
        let ids: Vec<SessionId> = self.maps.read().await.sessions.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.disconnect(id).await {
                warn!(session_id = %id, error = %e, "Disconnect during shutdown failed");
            }
        }
    }

    /// Starts a transaction on a checked-out connection
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn begin_transaction(&self, session_id: SessionId) -> EngineResult<TransactionId> {
        let pool = {
            let maps = self.maps.read().await;
            let session = maps
                .sessions
                .get(&session_id)
                .ok_or_else(|| EngineError::session_not_found(session_id.to_string()))?;
            if session.transaction.is_some() {
                return Err(Self::already_active());
            }
            Arc::clone(&session.pool)
        };

        let handle = pool.begin().await?;
        let transaction_id = TransactionId::new();

        // Another begin may have won the race while the connection was acquired
        let mut handle = Some(handle);
        let rejected = {
            let mut maps = self.maps.write().await;
            let rejected = match maps.sessions.get_mut(&session_id) {
                None => Some(EngineError::session_not_found(session_id.to_string())),
                Some(session) if session.transaction.is_some() => Some(Self::already_active()),
                Some(session) => {
                    session.transaction = Some(transaction_id);
                    None
                }
            };
            if rejected.is_none() {
                if let Some(handle) = handle.take() {
                    maps.transactions.insert(
                        transaction_id,
                        Arc::new(ActiveTransaction::new(transaction_id, session_id, handle)),
                    );
                }
            }
            rejected
        };

        if let Some(err) = rejected {
            if let Some(handle) = handle {
                if let Err(e) = handle.rollback().await {
                    warn!(error = %e, "Failed to release rejected transaction");
                }
            }
            return Err(err);
        }

        info!(transaction_id = %transaction_id, "Transaction started");
        self.emit(SessionEvent::TransactionStarted {
            session_id: session_id.to_string(),
            transaction_id: transaction_id.to_string(),
        });
        Ok(transaction_id)
    }

    pub async fn commit(&self, session_id: SessionId, transaction_id: TransactionId) -> EngineResult<()> {
        self.finish_transaction(session_id, transaction_id, true).await
    }

    pub async fn rollback(&self, session_id: SessionId, transaction_id: TransactionId) -> EngineResult<()> {
        self.finish_transaction(session_id, transaction_id, false).await
    }

    #[instrument(skip(self), fields(session_id = %session_id, transaction_id = %transaction_id))]
    async fn finish_transaction(
        &self,
        session_id: SessionId,
        transaction_id: TransactionId,
        commit: bool,
    ) -> EngineResult<()> {
        let transaction = {
            let mut maps = self.maps.write().await;
            let owned = maps
                .transactions
                .get(&transaction_id)
                .map(|tx| tx.session_id == session_id)
                .unwrap_or(false);
            if !owned {
                return Err(EngineError::transaction_not_found(transaction_id.to_string()));
            }
            if let Some(session) = maps.sessions.get_mut(&session_id) {
                session.transaction = None;
            }
            maps.transactions
                .remove(&transaction_id)
                .ok_or_else(|| EngineError::transaction_not_found(transaction_id.to_string()))?
        };

        let handle = transaction
            .take()
            .await
            .ok_or_else(|| EngineError::transaction_not_found(transaction_id.to_string()))?;
        let result = if commit {
            handle.commit().await
        } else {
            handle.rollback().await
        };

        match &result {
            Ok(()) => info!(committed = commit, "Transaction finished"),
            Err(e) => warn!(committed = commit, error = %e, "Transaction finished with error"),
        }
        self.emit(SessionEvent::TransactionFinished {
            session_id: session_id.to_string(),
            transaction_id: transaction_id.to_string(),
            committed: commit && result.is_ok(),
        });
        result
    }

    /// Resolves where statements for a session run: its open transaction if
    /// there is one, the pool otherwise.
    pub async fn route(&self, session_id: SessionId) -> EngineResult<Route> {
        let maps = self.maps.read().await;
        let session = maps
            .sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::session_not_found(session_id.to_string()))?;

        let transaction = session
            .transaction
            .and_then(|tx_id| maps.transactions.get(&tx_id).cloned());
        Ok(match transaction {
            Some(tx) => Route::Transaction(tx),
            None => Route::Pool(Arc::clone(&session.pool)),
        })
    }

    /// The session's pool, bypassing any open transaction
    pub async fn pool(&self, session_id: SessionId) -> EngineResult<Arc<dyn PoolHandle>> {
        let maps = self.maps.read().await;
        maps.sessions
            .get(&session_id)
            .map(|session| Arc::clone(&session.pool))
            .ok_or_else(|| EngineError::session_not_found(session_id.to_string()))
    }

    /// Lists all active sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let maps = self.maps.read().await;
        let mut sessions: Vec<SessionInfo> = maps
            .sessions
            .iter()
            .map(|(id, session)| session.info(*id))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Gets session info
    pub async fn session_info(&self, session_id: SessionId) -> Option<SessionInfo> {
        let maps = self.maps.read().await;
        maps.sessions.get(&session_id).map(|s| s.info(session_id))
    }

    /// Checks if a session exists
    pub async fn session_exists(&self, session_id: SessionId) -> bool {
        self.maps.read().await.sessions.contains_key(&session_id)
    }

    fn already_active() -> EngineError {
        EngineError::transaction_error("A transaction is already active on this session")
    }
}
