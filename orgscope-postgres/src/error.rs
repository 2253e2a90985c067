//! Error types for PostgreSQL operations.

use orgscope_core::ScopeError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// SQLSTATE raised when a write fails a row-level security `WITH CHECK`.
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// No pooled connection became available in time.
    #[error("no connection available after {0}ms")]
    Timeout(u64),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) | Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// SQLSTATE code of a server-side error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|c| c.code()),
            _ => None,
        }
    }

    /// Whether the server rejected a write under the row filter policy.
    pub fn is_policy_violation(&self) -> bool {
        self.sqlstate() == Some(INSUFFICIENT_PRIVILEGE)
    }
}

impl From<PgError> for ScopeError {
    fn from(err: PgError) -> Self {
        if err.is_policy_violation() {
            return ScopeError::policy_violation(err.to_string());
        }
        match err {
            PgError::Timeout(ms) => ScopeError::pool_exhausted(ms),
            PgError::Pool(deadpool_postgres::PoolError::Timeout(_)) => ScopeError::pool_exhausted(0),
            PgError::Pool(e) => ScopeError::connection(e.to_string()),
            PgError::Postgres(e) if e.is_closed() => ScopeError::connection(e.to_string()),
            PgError::Postgres(e) => ScopeError::database(e.to_string()),
            PgError::Config(msg) => ScopeError::config(msg),
            PgError::Connection(msg) => ScopeError::connection(msg),
            PgError::Query(msg) => ScopeError::database(msg),
            PgError::Internal(msg) => ScopeError::internal(msg),
        }
    }
}
