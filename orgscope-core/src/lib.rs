//! # orgscope-core
//!
//! Organization-scoped row-level security for pooled database connections.
//!
//! Every tenant-owned row carries an organization id, and the database only
//! shows a session the rows whose id matches the session variable
//! `app.org_id`. This crate makes sure that variable is always right:
//!
//! - a [`ContextResolver`] turns request credentials into an immutable
//!   [`TenantContext`], or rejects the request;
//! - a [`TenantPool`] is the only way to obtain a tenant connection, and it
//!   binds the context with a parameterized `set_config` before handing the
//!   connection out;
//! - a [`UnitOfWork`] clears the binding on release and destroys the
//!   connection when clearing fails or when it is dropped unreleased.
//!
//! ## Resolving a context
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> orgscope_core::ScopeResult<()> {
//! use orgscope_core::prelude::*;
//!
//! let members = StaticMembership::new();
//! let user = UserId::new_v4();
//! let org = OrgId::new_v4();
//! members.grant(user, org);
//!
//! let resolver = ContextResolver::new(members);
//! let creds = TenantCredentials::from_header(org.to_string())
//!     .with_principal(Principal::new(user));
//! let ctx = resolver.resolve(&creds).await?;
//! assert_eq!(ctx.organization_id(), org);
//! # Ok(())
//! # }
//! ```
//!
//! ## Running scoped work
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> orgscope_core::ScopeResult<()> {
//! use orgscope_core::memory::{MemoryDatabase, MemoryPool};
//! use orgscope_core::prelude::*;
//!
//! let pool = TenantPool::with_defaults(MemoryPool::new(MemoryDatabase::new(), 4));
//! let org = OrgId::new_v4();
//!
//! let rows = pool
//!     .scoped(TenantContext::new(org), |uow| {
//!         Box::pin(async move {
//!             uow.connection()?.insert("units", org, "unit 1")?;
//!             uow.connection()?.list("units")
//!         })
//!     })
//!     .await?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use orgscope_core::{ErrorCode, OrgId, RejectReason, ScopeError};
//!
//! let err = OrgId::parse("not-a-uuid").unwrap_err();
//! assert_eq!(err.code(), ErrorCode::MalformedTenant);
//! assert_eq!(err.reject_reason(), Some(RejectReason::Malformed));
//! assert!(!matches!(err, ScopeError::StaleContext(_)));
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod memory;
pub mod pool;
pub mod privileged;
pub mod scope;
pub mod session;
pub mod tenant;

pub use config::{EnvSource, MapEnvSource, ScopeConfig, StdEnvSource};
pub use error::{ErrorCode, RejectReason, ScopeError, ScopeResult};
pub use pool::{ConnectionPool, PoolStatus, Seal, TenantPool};
pub use privileged::PrivilegedPool;
pub use scope::{LeaseState, Lifecycle, UnitOfWork};
pub use session::{
    CURRENT_SETTING_SQL, ORG_SESSION_VARIABLE, SET_CONFIG_SQL, ScopedConnection,
    SessionConnection, SessionInitializer,
};
pub use tenant::{
    ContextResolver, MembershipStore, OrgId, Principal, RlsConfig, RlsManager, StaticMembership,
    TenantContext, TenantCredentials, TenantResolver, UserId,
};

// Re-export logging utilities
pub use logging::{get_log_format, get_log_level, init as init_logging, is_debug_enabled};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ScopeConfig;
    pub use crate::error::{ScopeError, ScopeResult};
    pub use crate::pool::{ConnectionPool, TenantPool};
    pub use crate::privileged::PrivilegedPool;
    pub use crate::scope::UnitOfWork;
    pub use crate::session::SessionConnection;
    pub use crate::tenant::{
        ContextResolver, MembershipStore, OrgId, Principal, StaticMembership, TenantContext,
        TenantCredentials, TenantResolver, UserId,
    };
}
