//! Audited cross-tenant access.
//!
//! Migrations and operational jobs that legitimately read across tenants use
//! a [`PrivilegedPool`], a separate type backed by a separate pool whose
//! database role bypasses row-level security. It never shares a pool with
//! [`TenantPool`](crate::TenantPool), and every use is recorded on the
//! `orgscope::audit` tracing target.

use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{error, info};

use crate::error::{ScopeError, ScopeResult};
use crate::pool::{ConnectionPool, Lease, PoolStatus};
use crate::session::{ORG_SESSION_VARIABLE, SessionConnection};

/// A pool reserved for explicitly audited cross-tenant operations.
#[derive(Debug, Clone)]
pub struct PrivilegedPool<P> {
    pool: P,
}

impl<P: ConnectionPool> PrivilegedPool<P> {
    /// Wrap a pool connected with the privileged role.
    pub fn new(pool: P) -> Self {
        Self { pool }
    }

    /// Run `f` on a privileged connection, recording `reason` in the audit log.
    ///
    /// The connection must not carry a tenant binding; one that does is
    /// destroyed and the call fails.
    pub async fn run<F, T>(&self, reason: &str, f: F) -> ScopeResult<T>
    where
        F: for<'c> FnOnce(&'c mut P::Connection) -> BoxFuture<'c, ScopeResult<T>> + Send,
        T: Send,
    {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ScopeError::config("privileged access requires a reason"));
        }

        info!(target: "orgscope::audit", reason = %reason, "Privileged access started");
        let started = Instant::now();

        // Held in a lease so a cancelled call destroys the connection.
        let mut lease = Lease::acquire(&self.pool).await?;

        let residue = lease.connection()?.current_setting(ORG_SESSION_VARIABLE).await;
        match residue {
            Ok(None) => {}
            Ok(Some(residue)) => {
                error!(
                    target: "orgscope::audit",
                    residue = %residue,
                    "Privileged connection carries a tenant binding"
                );
                lease.discard();
                return Err(ScopeError::stale(format!(
                    "privileged connection carries {ORG_SESSION_VARIABLE}={residue}"
                )));
            }
            Err(e) => {
                lease.discard();
                return Err(e);
            }
        }

        let result = f(lease.connection()?).await;

        // A privileged callback has no reason to bind, but clear anyway.
        let cleared = lease.connection()?.set_config(ORG_SESSION_VARIABLE, "").await;
        match cleared {
            Ok(v) if v.is_empty() => lease.release(),
            _ => lease.discard(),
        }

        info!(
            target: "orgscope::audit",
            reason = %reason,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Privileged access finished"
        );

        result
    }

    /// Current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}
