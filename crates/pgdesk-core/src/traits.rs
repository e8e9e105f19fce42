//! DataEngine trait definition
//!
//! This is the core abstraction that database drivers implement. A driver
//! opens pools; pools run statements and hand out transactions pinned to a
//! single connection. Session bookkeeping lives above this layer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::types::{ConnectionProfile, QueryOutput, Value};

/// Core trait that all database drivers must implement
#[async_trait]
pub trait DataEngine: Send + Sync {
    /// Returns the unique identifier for this driver (e.g., "postgres")
    fn driver_id(&self) -> &'static str;

    /// Returns a human-readable name for this driver
    fn driver_name(&self) -> &'static str;

    /// Alternative engine names resolving to this driver (e.g., "postgresql")
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Tests the connection without keeping anything open
    ///
    /// Use this to validate credentials before saving a profile.
    async fn test_connection(&self, profile: &ConnectionProfile) -> EngineResult<()>;

    /// Opens a connection pool for the profile
    ///
    /// Implementations must verify that at least one connection can be
    /// established before returning.
    async fn open(&self, profile: &ConnectionProfile) -> EngineResult<Arc<dyn PoolHandle>>;
}

/// An open connection pool bound to one session.
#[async_trait]
pub trait PoolHandle: Send + Sync {
    /// Runs SQL on any available connection.
    ///
    /// Without parameters the text may hold several statements; the output of
    /// the last row-producing one is returned.
    async fn query(&self, sql: &str, params: &[Value]) -> EngineResult<QueryOutput>;

    /// Reads at most `batch_size` rows of a single query through a server-side
    /// cursor.
    async fn fetch_batch(&self, sql: &str, batch_size: u32) -> EngineResult<QueryOutput>;

    /// Checks out a connection and starts a transaction on it.
    async fn begin(&self) -> EngineResult<Box<dyn TransactionHandle>>;

    /// Closes every pooled connection. Idempotent.
    async fn close(&self);

    /// Connections currently open (idle or in use)
    fn size(&self) -> u32;

    fn is_closed(&self) -> bool;
}

/// A transaction holding one checked-out connection until it ends.
#[async_trait]
pub trait TransactionHandle: Send {
    async fn query(&mut self, sql: &str, params: &[Value]) -> EngineResult<QueryOutput>;

    /// Commits and returns the connection to its pool.
    async fn commit(self: Box<Self>) -> EngineResult<()>;

    /// Rolls back and returns the connection to its pool.
    async fn rollback(self: Box<Self>) -> EngineResult<()>;
}
