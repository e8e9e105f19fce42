// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the pgdesk engine
//!
//! All driver-specific errors are mapped to these unified error types so the
//! command layer can turn them into `{ success: false, error }` responses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all engine operations
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("SSL/TLS error: {message}")]
    SslError { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Query syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Unsupported database engine: {engine}")]
    UnsupportedEngine { engine: String },

    #[error("Session not found or expired: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Transaction not found: {transaction_id}")]
    TransactionNotFound { transaction_id: String },

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: msg.into() }
    }

    pub fn ssl_error(msg: impl Into<String>) -> Self {
        Self::SslError { message: msg.into() }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn unsupported_engine(engine: impl Into<String>) -> Self {
        Self::UnsupportedEngine { engine: engine.into() }
    }

    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::SessionNotFound { session_id: id.into() }
    }

    pub fn transaction_not_found(id: impl Into<String>) -> Self {
        Self::TransactionNotFound { transaction_id: id.into() }
    }

    pub fn transaction_error(msg: impl Into<String>) -> Self {
        Self::TransactionError { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True for failures that happen while establishing a connection.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::AuthenticationFailed { .. }
                | Self::SslError { .. }
                | Self::Timeout { .. }
        )
    }

    /// True for routine SQL failures reported by the engine.
    pub fn is_statement_error(&self) -> bool {
        matches!(self, Self::SyntaxError { .. } | Self::ExecutionError { .. })
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
