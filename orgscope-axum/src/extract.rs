//! Extractors for tenant-scoped handlers.

use std::ops::{Deref, DerefMut};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use orgscope_core::{ConnectionPool, TenantContext, UnitOfWork};
use tokio::sync::OwnedMappedMutexGuard;

use crate::layer::RequestScope;
use crate::rejection::ScopeRejection;

/// The resolved tenant of the current request.
#[derive(Debug, Clone)]
pub struct Tenant(pub TenantContext);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = ScopeRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .map(Tenant)
            .ok_or(ScopeRejection::NotScoped("no tenant context"))
    }
}

/// Exclusive access to the request's bound unit of work.
///
/// Only available behind [`OrgScopeLayer`](crate::OrgScopeLayer). Holding it
/// across `.await` is fine; the layer waits for it before releasing.
pub struct TenantConn<P: ConnectionPool>(OwnedMappedMutexGuard<Option<UnitOfWork<P>>, UnitOfWork<P>>);

impl<P: ConnectionPool> Deref for TenantConn<P> {
    type Target = UnitOfWork<P>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<P: ConnectionPool> DerefMut for TenantConn<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<P: ConnectionPool> std::fmt::Debug for TenantConn<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TenantConn").field(&*self.0).finish()
    }
}

impl<S, P> FromRequestParts<S> for TenantConn<P>
where
    S: Send + Sync,
    P: ConnectionPool,
{
    type Rejection = ScopeRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let scope = parts
            .extensions
            .get::<RequestScope<P>>()
            .cloned()
            .ok_or(ScopeRejection::NotScoped("no unit of work"))?;

        let guard = scope
            .slot
            .try_lock_owned()
            .map_err(|_| ScopeRejection::AlreadyBorrowed)?;

        tokio::sync::OwnedMutexGuard::try_map(guard, Option::as_mut)
            .map(TenantConn)
            .map_err(|_| ScopeRejection::NotScoped("unit of work already released"))
    }
}
