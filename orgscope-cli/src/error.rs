//! CLI error types and result alias.

use miette::Diagnostic;
use orgscope_core::ScopeError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(orgscope::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(orgscope::config))]
    Config(String),

    /// Bad command-line input
    #[error("Invalid arguments: {0}")]
    #[diagnostic(code(orgscope::usage), help("run with --help to see the accepted flags"))]
    Usage(String),

    /// Tenant scoping failure
    #[error("Scope error: {0}")]
    #[diagnostic(code(orgscope::scope))]
    Scope(#[from] ScopeError),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(code(orgscope::database))]
    Database(String),

    /// One or more isolation proofs did not hold
    #[error("Isolation probe failed: {0}")]
    #[diagnostic(
        code(orgscope::probe),
        help("check that the application role is not a superuser and lacks BYPASSRLS")
    )]
    ProbeFailed(String),
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

#[cfg(feature = "postgres")]
impl From<orgscope_postgres::PgError> for CliError {
    fn from(err: orgscope_postgres::PgError) -> Self {
        CliError::Database(err.to_string())
    }
}
