//! Units of work and their lifecycle.
//!
//! A [`UnitOfWork`] owns one leased connection from the moment it is bound
//! until it is released. The lifecycle is:
//!
//! ```text
//! Idle -> ContextResolved -> ConnectionBound -> InUse -> Releasing -> Idle
//!   \-> Rejected
//! ```
//!
//! `release` clears the session value and returns the connection; if that
//! fails the connection is destroyed. Dropping a unit of work without
//! releasing it (panic, cancelled future, timed-out request) destroys the
//! connection.

use std::fmt;

use tracing::{debug, error, trace, warn};

use crate::error::{ScopeError, ScopeResult};
use crate::pool::{ConnectionPool, Seal};
use crate::session::{ScopedConnection, SessionInitializer};
use crate::tenant::TenantContext;

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// No context, no connection.
    Idle,
    /// A tenant context has been resolved; no connection leased yet.
    ContextResolved,
    /// A connection is leased and bound to the context.
    ConnectionBound,
    /// Business logic has taken the connection.
    InUse,
    /// The connection is being cleared and returned.
    Releasing,
    /// Context resolution failed; nothing was leased.
    Rejected,
}

impl LeaseState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: LeaseState) -> bool {
        use LeaseState::*;
        matches!(
            (self, next),
            (Idle, ContextResolved)
                | (Idle, Rejected)
                | (ContextResolved, ConnectionBound)
                | (ContextResolved, Idle)
                | (ConnectionBound, InUse)
                | (ConnectionBound, Releasing)
                | (InUse, InUse)
                | (InUse, Releasing)
                | (Releasing, Idle)
        )
    }

    /// Whether a connection is held in this state.
    pub fn holds_connection(self) -> bool {
        matches!(self, Self::ConnectionBound | Self::InUse | Self::Releasing)
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::ContextResolved => "context_resolved",
            Self::ConnectionBound => "connection_bound",
            Self::InUse => "in_use",
            Self::Releasing => "releasing",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Tracks and validates lifecycle transitions.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    state: LeaseState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LeaseState::Idle,
        }
    }
}

impl Lifecycle {
    /// Start in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> LeaseState {
        self.state
    }

    /// Move to `next`, failing on an illegal transition.
    pub fn advance(&mut self, next: LeaseState) -> ScopeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ScopeError::InvalidTransition(format!(
                "{} -> {}",
                self.state, next
            )));
        }
        trace!(from = %self.state, to = %next, "Unit of work transition");
        self.state = next;
        Ok(())
    }
}

/// A leased, bound connection for one tenant.
pub struct UnitOfWork<P: ConnectionPool> {
    pool: P,
    initializer: SessionInitializer,
    context: TenantContext,
    conn: Option<ScopedConnection<P::Connection>>,
    lifecycle: Lifecycle,
}

impl<P: ConnectionPool> UnitOfWork<P> {
    /// Lease a connection and bind `context` to it.
    ///
    /// On any failure after the lease the connection is destroyed.
    pub(crate) async fn begin(
        pool: P,
        initializer: SessionInitializer,
        context: TenantContext,
    ) -> ScopeResult<Self> {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(LeaseState::ContextResolved)?;

        let conn = match pool.acquire(Seal::new()).await {
            Ok(conn) => conn,
            Err(e) => {
                lifecycle.advance(LeaseState::Idle)?;
                warn!(code = %e.code(), error = %e, "Could not lease a connection");
                return Err(e);
            }
        };

        // The connection lives in `uow` from here on, so a future cancelled
        // mid-bind drops into `Drop` and destroys it.
        let mut uow = Self {
            pool,
            initializer,
            context,
            conn: Some(ScopedConnection::new(conn)),
            lifecycle,
        };

        let scoped = uow
            .conn
            .as_mut()
            .ok_or_else(|| ScopeError::internal("unit of work has no connection"))?;
        let bound = initializer.bind(scoped, &uow.context).await;
        if let Err(e) = bound {
            error!(
                code = %e.code(),
                error = %e,
                org_id = %uow.context.organization_id(),
                "Binding failed, destroying connection"
            );
            uow.destroy_connection();
            uow.lifecycle.advance(LeaseState::Idle)?;
            return Err(e);
        }

        uow.lifecycle.advance(LeaseState::ConnectionBound)?;
        debug!(org_id = %uow.context.organization_id(), "Unit of work started");
        Ok(uow)
    }

    fn destroy_connection(&mut self) {
        if let Some(scoped) = self.conn.take() {
            self.pool.discard(scoped.into_inner(), Seal::new());
        }
    }

    /// The tenant this unit of work is scoped to.
    pub fn context(&self) -> &TenantContext {
        &self.context
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LeaseState {
        self.lifecycle.state()
    }

    /// Whether a tenant is currently bound to the connection.
    pub fn is_bound(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.is_bound())
    }

    /// Borrow the bound connection for queries.
    pub fn connection(&mut self) -> ScopeResult<&mut P::Connection> {
        self.lifecycle.advance(LeaseState::InUse)?;
        match self.conn.as_mut() {
            Some(scoped) => Ok(scoped.connection()),
            None => Err(ScopeError::internal("unit of work has no connection")),
        }
    }

    /// Re-assert the binding for this unit of work's own context.
    ///
    /// Harmless when already bound; restores the binding after [`unbind`](Self::unbind).
    pub async fn rebind(&mut self) -> ScopeResult<()> {
        let scoped = self
            .conn
            .as_mut()
            .ok_or_else(|| ScopeError::internal("unit of work has no connection"))?;
        self.initializer.bind(scoped, &self.context).await
    }

    /// Clear the session value while keeping the lease.
    ///
    /// Queries issued while unbound see no tenant rows.
    pub async fn unbind(&mut self) -> ScopeResult<()> {
        let scoped = self
            .conn
            .as_mut()
            .ok_or_else(|| ScopeError::internal("unit of work has no connection"))?;
        self.initializer.reset(scoped).await
    }

    /// Clear the session state and return the connection to the pool.
    ///
    /// If clearing fails the connection is destroyed and the error returned.
    pub async fn release(mut self) -> ScopeResult<()> {
        self.lifecycle.advance(LeaseState::Releasing)?;

        let initializer = self.initializer;
        let scoped = self
            .conn
            .as_mut()
            .ok_or_else(|| ScopeError::internal("unit of work has no connection"))?;

        // Still owned by `self` while clearing; a cancelled release destroys it.
        let outcome = initializer.reset(scoped).await;
        match &outcome {
            Ok(()) => {
                if let Some(scoped) = self.conn.take() {
                    self.pool.release(scoped.into_inner(), Seal::new());
                }
                debug!(org_id = %self.context.organization_id(), "Unit of work released");
            }
            Err(e) => {
                error!(
                    code = %e.code(),
                    error = %e,
                    org_id = %self.context.organization_id(),
                    "Session reset failed, destroying connection"
                );
                self.destroy_connection();
            }
        }

        self.lifecycle.advance(LeaseState::Idle)?;
        outcome
    }
}

impl<P: ConnectionPool> Drop for UnitOfWork<P> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!(
                org_id = %self.context.organization_id(),
                state = %self.lifecycle.state(),
                "Unit of work dropped without release, destroying connection"
            );
            self.destroy_connection();
        }
    }
}

impl<P: ConnectionPool> fmt::Debug for UnitOfWork<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("org_id", &self.context.organization_id())
            .field("state", &self.lifecycle.state())
            .field("bound", &self.is_bound())
            .finish()
    }
}
