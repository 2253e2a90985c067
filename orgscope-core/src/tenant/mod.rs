//! Tenant identity and the database policies that enforce it.
//!
//! - [`context`]: validated organization ids and the immutable [`TenantContext`]
//! - [`resolver`]: turning request credentials into a context
//! - [`rls`]: DDL for the row filter policies

pub mod context;
pub mod resolver;
pub mod rls;

pub use context::{OrgId, TenantContext, UserId};
pub use resolver::{
    ContextResolver, MembershipStore, Principal, StaticMembership, TenantCredentials,
    TenantResolver,
};
pub use rls::{PolicyCommand, RlsConfig, RlsManager, RlsManagerBuilder, RlsPolicy, quote_ident};
