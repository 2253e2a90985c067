//! # orgscope-postgres
//!
//! PostgreSQL backend for orgscope.
//!
//! This crate provides:
//! - [`PgPool`], a `deadpool-postgres` pool implementing
//!   [`ConnectionPool`](orgscope_core::ConnectionPool)
//! - [`PgConnection`], whose session binding runs
//!   `SELECT set_config($1, $2, false)` with both values as bound parameters
//! - [`PgConfig`], URL and environment based connection settings
//! - [`Probe`], a live check of the isolation guarantees against a server
//!
//! ## Example
//!
//! ```rust,no_run
//! use orgscope_core::{OrgId, ScopeConfig, TenantContext};
//! use orgscope_postgres::{PgConfig, PgPool, PoolConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scope = ScopeConfig::from_env()?;
//! let pool = PgPool::with_pool_config(PgConfig::from_env()?, PoolConfig::from_scope(&scope))
//!     .await?
//!     .into_tenant_pool(&scope);
//!
//! let org = OrgId::parse("7d1f0d2e-5c1b-4c43-9a59-0d8f5f3c2b11")?;
//! let mut uow = pool.begin(TenantContext::new(org)).await?;
//! let rows = uow.connection()?.query("SELECT id FROM units", &[]).await?;
//! uow.release().await?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod probe;

pub use config::{PgConfig, PgConfigBuilder, SslMode};
pub use connection::{PgConnection, PgTransaction};
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PgPoolBuilder, PoolConfig};
pub use probe::{Probe, ProbeReport, ProofOutcome};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{PgConfig, PgConfigBuilder};
    pub use crate::connection::PgConnection;
    pub use crate::error::{PgError, PgResult};
    pub use crate::pool::{PgPool, PgPoolBuilder, PoolConfig};
}
