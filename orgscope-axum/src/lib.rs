//! Axum integration for orgscope.
//!
//! [`OrgScopeLayer`] runs the whole tenant lifecycle around each request:
//!
//! 1. read the `x-org-id` header and any [`Principal`](orgscope_core::Principal)
//!    an authentication layer placed in the request extensions;
//! 2. resolve a [`TenantContext`](orgscope_core::TenantContext) or answer
//!    `401`/`403` without touching the pool;
//! 3. lease and bind a connection, or answer `503`;
//! 4. run the handler, which reaches the connection through [`TenantConn`];
//! 5. clear the binding and return the connection.
//!
//! If the request future is dropped before step 5 (client disconnect,
//! timeout layer, panic) the connection is destroyed instead of returned.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{Router, routing::get};
//! use orgscope_axum::{OrgScopeLayer, TenantConn, PgTenantConn};
//! use orgscope_core::{ContextResolver, ScopeConfig};
//! use orgscope_postgres::{PgConfig, PgPool, PoolConfig};
//!
//! async fn units(mut conn: PgTenantConn) -> Result<String, orgscope_axum::ScopeRejection> {
//!     let rows = conn.connection()?.query("SELECT id FROM units", &[]).await
//!         .map_err(orgscope_core::ScopeError::from)?;
//!     Ok(rows.len().to_string())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScopeConfig::from_env()?;
//!     let pool = PgPool::with_pool_config(PgConfig::from_env()?, PoolConfig::from_scope(&config))
//!         .await?
//!         .into_tenant_pool(&config);
//!     let resolver = ContextResolver::from_config(my_membership_store(), &config);
//!
//!     let app = Router::new()
//!         .route("/units", get(units))
//!         .layer(OrgScopeLayer::new(pool, resolver, &config)?);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

mod extract;
mod layer;
mod rejection;

pub use extract::{Tenant, TenantConn};
pub use layer::{OrgScopeLayer, OrgScopeMiddleware, RequestScope};
pub use rejection::{RETRY_AFTER_SECS, ScopeRejection};

/// [`TenantConn`] over the PostgreSQL backend.
#[cfg(feature = "postgres")]
pub type PgTenantConn = TenantConn<orgscope_postgres::PgPool>;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{OrgScopeLayer, ScopeRejection, Tenant, TenantConn};
    pub use orgscope_core::prelude::*;
}
