//! In-memory driver
//!
//! A scripted stand-in for a real server. SQL text is matched exactly
//! (after trimming) against canned responses; anything unscripted returns an
//! empty result. Every statement, including `BEGIN`/`COMMIT`/`ROLLBACK`, is
//! appended to a journal so tests can assert on ordering. Pool and
//! connection counters show whether resources were released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::statement;
use crate::engine::traits::{DataEngine, PoolHandle, TransactionHandle};
use crate::engine::types::{ConnectionProfile, QueryOutput, Value};

#[derive(Clone)]
enum Scripted {
    Output(QueryOutput),
    Error(EngineError),
}

#[derive(Default)]
struct MemoryState {
    responses: HashMap<String, Scripted>,
    connect_error: Option<EngineError>,
    rollback_error: Option<EngineError>,
    journal: Vec<String>,
    open_pools: usize,
    checked_out: usize,
}

/// Scripted driver registered under the engine id `memory`
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the output for a statement
    pub fn respond(&self, sql: &str, output: QueryOutput) {
        self.state
            .lock()
            .responses
            .insert(sql.trim().to_string(), Scripted::Output(output));
    }

    /// Scripts a failure for a statement
    pub fn fail(&self, sql: &str, error: EngineError) {
        self.state
            .lock()
            .responses
            .insert(sql.trim().to_string(), Scripted::Error(error));
    }

    /// Makes every subsequent connect attempt fail
    pub fn reject_connections(&self, error: EngineError) {
        self.state.lock().connect_error = Some(error);
    }

    /// Makes every subsequent rollback fail (the connection is still released)
    pub fn fail_rollbacks(&self, error: EngineError) {
        self.state.lock().rollback_error = Some(error);
    }

    /// Statements seen so far, in order
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    /// Pools opened and not yet closed
    pub fn open_pools(&self) -> usize {
        self.state.lock().open_pools
    }

    /// Connections currently held by transactions
    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out
    }

    fn run(state: &Mutex<MemoryState>, sql: &str) -> EngineResult<QueryOutput> {
        let key = sql.trim().to_string();
        let mut state = state.lock();
        state.journal.push(key.clone());
        match state.responses.get(&key) {
            Some(Scripted::Output(output)) => Ok(output.clone()),
            Some(Scripted::Error(err)) => Err(err.clone()),
            None => Ok(QueryOutput::default()),
        }
    }
}

#[async_trait]
impl DataEngine for MemoryDriver {
    fn driver_id(&self) -> &'static str {
        "memory"
    }

    fn driver_name(&self) -> &'static str {
        "In-memory (scripted)"
    }

    async fn test_connection(&self, _profile: &ConnectionProfile) -> EngineResult<()> {
        match self.state.lock().connect_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn open(&self, _profile: &ConnectionProfile) -> EngineResult<Arc<dyn PoolHandle>> {
        let mut state = self.state.lock();
        if let Some(err) = state.connect_error.clone() {
            return Err(err);
        }
        state.open_pools += 1;
        Ok(Arc::new(MemoryPool {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryPool {
    state: Arc<Mutex<MemoryState>>,
    closed: AtomicBool,
}

impl MemoryPool {
    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::connection_failed("pool is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PoolHandle for MemoryPool {
    async fn query(&self, sql: &str, _params: &[Value]) -> EngineResult<QueryOutput> {
        self.ensure_open()?;
        MemoryDriver::run(&self.state, sql)
    }

    async fn fetch_batch(&self, sql: &str, batch_size: u32) -> EngineResult<QueryOutput> {
        self.ensure_open()?;
        if !statement::is_single_query(sql) {
            return Err(EngineError::validation(
                "Streaming requires a single SELECT statement",
            ));
        }
        let mut output = MemoryDriver::run(&self.state, statement::strip_trailing_semicolons(sql))?;
        output.rows.truncate(batch_size.max(1) as usize);
        output.row_count = Some(output.rows.len() as u64);
        Ok(output)
    }

    async fn begin(&self) -> EngineResult<Box<dyn TransactionHandle>> {
        self.ensure_open()?;
        {
            let mut state = self.state.lock();
            state.journal.push("BEGIN".to_string());
            state.checked_out += 1;
        }
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            finished: false,
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.lock().open_pools -= 1;
        }
    }

    fn size(&self) -> u32 {
        if self.closed.load(Ordering::SeqCst) {
            0
        } else {
            1
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    finished: bool,
}

impl MemoryTransaction {
    fn finish(&mut self, statement: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut state = self.state.lock();
        state.journal.push(statement.to_string());
        state.checked_out -= 1;
    }
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    async fn query(&mut self, sql: &str, _params: &[Value]) -> EngineResult<QueryOutput> {
        MemoryDriver::run(&self.state, sql)
    }

    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let mut this = self;
        this.finish("COMMIT");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> EngineResult<()> {
        let mut this = self;
        this.finish("ROLLBACK");
        let failure = this.state.lock().rollback_error.clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.finish("ROLLBACK");
    }
}
