//! # orgscope
//!
//! Organization-scoped row-level security for pooled Postgres connections.
//!
//! orgscope makes the database, not the application, responsible for keeping
//! tenants apart:
//! - every request resolves exactly one organization or is rejected
//! - every pooled connection is bound to that organization before use and
//!   cleared (or destroyed) before it goes back to the pool
//! - generated policies filter every tenant-owned table on `app.org_id`
//!   and fail closed when it is unset or malformed
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orgscope::prelude::*;
//! use orgscope::postgres::{PgConfig, PgPool, PoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScopeConfig::from_env()?;
//!     let pool = PgPool::with_pool_config(PgConfig::from_env()?, PoolConfig::from_scope(&config))
//!         .await?
//!         .into_tenant_pool(&config);
//!
//!     let org = OrgId::parse("6f1c2f0e-8d7a-4b59-9a3e-2b8f5d4c1a77")?;
//!     let count = pool
//!         .scoped(TenantContext::new(org), |uow| Box::pin(async move {
//!             let row = uow.connection()?.query_one("SELECT count(*) FROM units", &[]).await?;
//!             Ok(row.get::<_, i64>(0))
//!         }))
//!         .await?;
//!
//!     println!("{org} owns {count} units");
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use orgscope_core::*;

/// PostgreSQL backend (deadpool-postgres).
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use orgscope_postgres::*;
}

/// Axum and tower integration.
#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod axum {
    pub use orgscope_axum::*;
}
