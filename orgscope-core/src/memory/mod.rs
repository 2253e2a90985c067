//! In-memory backend that behaves like a pooled Postgres for tenant scoping.
//!
//! [`MemoryPool`] hands out connections whose session settings persist across
//! leases, and [`MemoryDatabase`] applies the same fail-closed row filter the
//! generated policies do. Both exist so the isolation guarantees can be
//! exercised without a database server.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> orgscope_core::ScopeResult<()> {
//! use orgscope_core::memory::{MemoryDatabase, MemoryPool};
//! use orgscope_core::{OrgId, TenantContext, TenantPool};
//!
//! let pool = TenantPool::with_defaults(MemoryPool::new(MemoryDatabase::new(), 2));
//! let org = OrgId::new_v4();
//!
//! let mut uow = pool.begin(TenantContext::new(org)).await?;
//! uow.connection()?.insert("units", org, "unit 1")?;
//! assert_eq!(uow.connection()?.list("units")?.len(), 1);
//! uow.release().await?;
//! # Ok(())
//! # }
//! ```

mod database;
mod pool;

pub use database::{MemoryDatabase, Record, current_org};
pub use pool::{MemoryConnection, MemoryPool};
