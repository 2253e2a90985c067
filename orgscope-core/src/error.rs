//! Error types for tenant scoping with stable codes.
//!
//! Every error carries an [`ErrorCode`] for programmatic handling. The
//! `Display` output is meant for server-side logs and may include
//! identifiers; anything rendered to a caller must go through
//! [`ScopeError::public_message`].
//!
//! # Error Codes
//!
//! Error codes follow a pattern: OS{category}{number}
//! - 1xxx: Context resolution (missing, malformed, not a member)
//! - 2xxx: Session binding (bind failed, stale context, reset failed)
//! - 3xxx: Pool (exhausted, connection failed)
//! - 4xxx: Database statements
//! - 7xxx: Configuration
//! - 9xxx: Internal invariants
//!
//! ```rust
//! use orgscope_core::{ErrorCode, ScopeError};
//!
//! let err = ScopeError::pool_exhausted(5000);
//! assert_eq!(err.code(), ErrorCode::PoolExhausted);
//! assert_eq!(err.code().as_str(), "OS3001");
//! assert!(err.is_retryable());
//! ```

use std::fmt;

use thiserror::Error;

/// Result type for scoping operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Context resolution (1xxx)
    /// No tenant identifier on the request (OS1001).
    MissingTenant = 1001,
    /// Tenant identifier is not a valid organization id (OS1002).
    MalformedTenant = 1002,
    /// Principal is not a member of the requested organization (OS1003).
    NotAMember = 1003,
    /// Header-only resolution attempted without an authenticated principal (OS1004).
    Unauthenticated = 1004,
    /// Header and claim name different organizations (OS1005).
    AmbiguousTenant = 1005,
    /// Organization is not on the header allow-list (OS1006).
    NotAllowed = 1006,

    // Session binding (2xxx)
    /// The session configuration statement failed (OS2001).
    BindFailed = 2001,
    /// A connection carries session state from another unit of work (OS2002).
    StaleContext = 2002,
    /// Clearing session state on release failed (OS2003).
    ResetFailed = 2003,

    // Pool (3xxx)
    /// No connection became available within the acquire timeout (OS3001).
    PoolExhausted = 3001,
    /// The pool could not open or hand out a connection (OS3002).
    ConnectionFailed = 3002,

    // Database (4xxx)
    /// A statement failed (OS4001).
    DatabaseError = 4001,
    /// A write violated a row-level security policy (OS4002).
    PolicyViolation = 4002,

    // Configuration (7xxx)
    /// Invalid configuration value (OS7001).
    InvalidConfig = 7001,

    // Internal (9xxx)
    /// A unit of work moved through an impossible lifecycle transition (OS9001).
    InvalidTransition = 9001,
    /// Other internal failure (OS9002).
    Internal = 9002,
}

impl ErrorCode {
    /// Get the string code (e.g., "OS2002").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTenant => "OS1001",
            Self::MalformedTenant => "OS1002",
            Self::NotAMember => "OS1003",
            Self::Unauthenticated => "OS1004",
            Self::AmbiguousTenant => "OS1005",
            Self::NotAllowed => "OS1006",
            Self::BindFailed => "OS2001",
            Self::StaleContext => "OS2002",
            Self::ResetFailed => "OS2003",
            Self::PoolExhausted => "OS3001",
            Self::ConnectionFailed => "OS3002",
            Self::DatabaseError => "OS4001",
            Self::PolicyViolation => "OS4002",
            Self::InvalidConfig => "OS7001",
            Self::InvalidTransition => "OS9001",
            Self::Internal => "OS9002",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tenant context could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// No candidate identifier.
    Missing,
    /// The candidate is not a valid organization id.
    Malformed,
    /// Header and principal claim disagree.
    Ambiguous,
    /// The principal does not belong to the organization.
    NotAMember,
    /// No principal and header-only resolution is disabled.
    Unauthenticated,
    /// Header-only resolution for an organization outside the allow-list.
    NotAllowed,
}

impl RejectReason {
    fn code(self) -> ErrorCode {
        match self {
            Self::Missing => ErrorCode::MissingTenant,
            Self::Malformed => ErrorCode::MalformedTenant,
            Self::Ambiguous => ErrorCode::AmbiguousTenant,
            Self::NotAMember => ErrorCode::NotAMember,
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::NotAllowed => ErrorCode::NotAllowed,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Missing => "missing tenant identifier",
            Self::Malformed => "malformed tenant identifier",
            Self::Ambiguous => "conflicting tenant identifiers",
            Self::NotAMember => "principal is not a member of the organization",
            Self::Unauthenticated => "unauthenticated tenant assertion",
            Self::NotAllowed => "organization not on the allow-list",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while scoping work to a tenant.
#[derive(Error, Debug)]
pub enum ScopeError {
    /// The request's tenant context could not be resolved.
    #[error("context resolution failed: {reason}: {detail}")]
    ContextResolution {
        /// Classified cause.
        reason: RejectReason,
        /// Server-side detail.
        detail: String,
    },

    /// The session configuration statement failed.
    #[error("session binding failed: {0}")]
    Binding(String),

    /// A connection carries session state that does not belong to this unit of work.
    #[error("stale session context: {0}")]
    StaleContext(String),

    /// Clearing session state before release failed.
    #[error("session reset failed: {0}")]
    Reset(String),

    /// No connection became available in time.
    #[error("connection pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The pool could not provide a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A database statement failed.
    #[error("database error: {0}")]
    Database(String),

    /// A write was rejected by the row filter policy.
    #[error("row-level security policy violation: {0}")]
    PolicyViolation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A unit of work attempted an invalid lifecycle transition.
    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScopeError {
    /// Create a context resolution error.
    pub fn rejected(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self::ContextResolution {
            reason,
            detail: detail.into(),
        }
    }

    /// Create a binding error.
    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding(message.into())
    }

    /// Create a stale context error.
    pub fn stale(message: impl Into<String>) -> Self {
        Self::StaleContext(message.into())
    }

    /// Create a reset error.
    pub fn reset(message: impl Into<String>) -> Self {
        Self::Reset(message.into())
    }

    /// Create a pool exhaustion error.
    pub fn pool_exhausted(waited_ms: u64) -> Self {
        Self::PoolExhausted { waited_ms }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a policy violation error.
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ContextResolution { reason, .. } => reason.code(),
            Self::Binding(_) => ErrorCode::BindFailed,
            Self::StaleContext(_) => ErrorCode::StaleContext,
            Self::Reset(_) => ErrorCode::ResetFailed,
            Self::PoolExhausted { .. } => ErrorCode::PoolExhausted,
            Self::Connection(_) => ErrorCode::ConnectionFailed,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::PolicyViolation(_) => ErrorCode::PolicyViolation,
            Self::Config(_) => ErrorCode::InvalidConfig,
            Self::InvalidTransition(_) => ErrorCode::InvalidTransition,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The rejection reason, for context resolution errors.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::ContextResolution { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Check if this is a context resolution error.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::ContextResolution { .. })
    }

    /// Check if the connection involved must be destroyed rather than reused.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::Binding(_) | Self::StaleContext(_) | Self::Reset(_)
        )
    }

    /// Check if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }

    /// A message safe to show to the request's caller.
    ///
    /// Never contains organization or user identifiers.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::ContextResolution {
                reason: RejectReason::Unauthenticated,
                ..
            } => "authentication required",
            Self::ContextResolution { .. } => "access to the requested organization is denied",
            Self::PoolExhausted { .. } => "service is busy, retry later",
            Self::Binding(_)
            | Self::StaleContext(_)
            | Self::Reset(_)
            | Self::Connection(_) => "service temporarily unavailable",
            Self::PolicyViolation(_) => "operation not permitted",
            Self::Database(_)
            | Self::Config(_)
            | Self::InvalidTransition(_)
            | Self::Internal(_) => "internal server error",
        }
    }
}
