//! Binding a tenant context to a connection's session.
//!
//! This module is the single place that names the session variable read by
//! the row filter policies. Binding always goes through `set_config` with the
//! variable name and the organization id as bound parameters:
//!
//! ```sql
//! SELECT set_config($1, $2, false)
//! ```
//!
//! Session scope (`false`) is used so the value survives statement and
//! transaction boundaries within one unit of work; the unit of work clears
//! it before the connection goes back to the pool.

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::ScopeConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::tenant::{OrgId, TenantContext};

/// The session variable consulted by every row filter policy.
pub const ORG_SESSION_VARIABLE: &str = "app.org_id";

/// Parameterized session configuration statement.
pub const SET_CONFIG_SQL: &str = "SELECT set_config($1, $2, false)";

/// Parameterized read of the current session value.
pub const CURRENT_SETTING_SQL: &str = "SELECT current_setting($1, true)";

/// A connection that supports session-scoped configuration.
///
/// Implementations must send both arguments as bound parameters.
#[async_trait]
pub trait SessionConnection: Send {
    /// Run `SELECT set_config($1, $2, false)` and return the value reported back.
    async fn set_config(&mut self, name: &str, value: &str) -> ScopeResult<String>;

    /// Run `SELECT current_setting($1, true)`. Unset and empty both map to `None`.
    async fn current_setting(&mut self, name: &str) -> ScopeResult<Option<String>>;
}

/// A leased connection together with the organization bound to it.
#[derive(Debug)]
pub struct ScopedConnection<C> {
    conn: C,
    bound: Option<OrgId>,
    verified: bool,
}

impl<C: SessionConnection> ScopedConnection<C> {
    /// Wrap a freshly leased connection. Nothing is bound yet.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            bound: None,
            verified: false,
        }
    }

    /// Whether a tenant is bound.
    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// The organization currently bound, if any.
    pub fn bound_org(&self) -> Option<OrgId> {
        self.bound
    }

    /// Borrow the underlying connection.
    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Unwrap the underlying connection.
    pub fn into_inner(self) -> C {
        self.conn
    }
}

/// Performs the bind and reset steps of a unit of work.
#[derive(Debug, Clone, Copy)]
pub struct SessionInitializer {
    verify_residual: bool,
}

impl Default for SessionInitializer {
    fn default() -> Self {
        Self {
            verify_residual: true,
        }
    }
}

impl SessionInitializer {
    /// Create an initializer.
    pub fn new(verify_residual: bool) -> Self {
        Self { verify_residual }
    }

    /// Create an initializer from configuration.
    pub fn from_config(config: &ScopeConfig) -> Self {
        Self::new(config.verify_residual)
    }

    /// Bind `ctx` to the connection.
    ///
    /// Re-binding the organization that is already bound is a no-op. Any
    /// other pre-existing state is a [`ScopeError::StaleContext`].
    pub async fn bind<C: SessionConnection>(
        &self,
        scoped: &mut ScopedConnection<C>,
        ctx: &TenantContext,
    ) -> ScopeResult<()> {
        let org = ctx.organization_id();

        match scoped.bound {
            Some(bound) if bound == org => {
                debug!(org_id = %org, "Tenant already bound, skipping set_config");
                return Ok(());
            }
            Some(bound) => {
                error!(
                    bound_org = %bound,
                    requested_org = %org,
                    "Connection is bound to a different organization"
                );
                return Err(ScopeError::stale(format!(
                    "connection bound to {bound}, requested {org}"
                )));
            }
            None => {}
        }

        if self.verify_residual && !scoped.verified {
            let residue = scoped
                .conn
                .current_setting(ORG_SESSION_VARIABLE)
                .await
                .map_err(|e| ScopeError::binding(format!("reading session state: {e}")))?;

            if let Some(residue) = residue {
                error!(
                    residue = %residue,
                    requested_org = %org,
                    "Leased connection carries session state from a previous unit of work"
                );
                return Err(ScopeError::stale(format!(
                    "leased connection still carries {ORG_SESSION_VARIABLE}={residue}"
                )));
            }
            scoped.verified = true;
        }

        let value = org.to_string();
        let reported = scoped
            .conn
            .set_config(ORG_SESSION_VARIABLE, &value)
            .await
            .map_err(|e| ScopeError::binding(format!("set_config failed: {e}")))?;

        if reported != value {
            return Err(ScopeError::binding(format!(
                "set_config reported {reported}, expected {value}"
            )));
        }

        scoped.bound = Some(org);
        debug!(org_id = %org, "Tenant bound to connection");
        Ok(())
    }

    /// Clear the session value so the connection carries no tenant.
    pub async fn reset<C: SessionConnection>(
        &self,
        scoped: &mut ScopedConnection<C>,
    ) -> ScopeResult<()> {
        let previous = scoped.bound.take();
        let reported = scoped
            .conn
            .set_config(ORG_SESSION_VARIABLE, "")
            .await
            .map_err(|e| ScopeError::reset(format!("clearing session state: {e}")))?;

        if !reported.is_empty() {
            return Err(ScopeError::reset(format!(
                "set_config reported {reported} after clearing"
            )));
        }

        debug!(previous_org = ?previous.map(|o| o.to_string()), "Session tenant cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A connection that records every statement it is asked to run.
    #[derive(Default)]
    struct Recording {
        value: Option<String>,
        calls: Vec<(String, String)>,
        fail_set: bool,
    }

    #[async_trait]
    impl SessionConnection for Recording {
        async fn set_config(&mut self, name: &str, value: &str) -> ScopeResult<String> {
            self.calls.push((name.to_string(), value.to_string()));
            if self.fail_set {
                return Err(ScopeError::database("connection reset by peer"));
            }
            self.value = Some(value.to_string());
            Ok(value.to_string())
        }

        async fn current_setting(&mut self, _name: &str) -> ScopeResult<Option<String>> {
            Ok(self.value.clone().filter(|v| !v.is_empty()))
        }
    }

    #[tokio::test]
    async fn test_bind_sets_single_variable() {
        let org = OrgId::new_v4();
        let mut scoped = ScopedConnection::new(Recording::default());

        SessionInitializer::default()
            .bind(&mut scoped, &TenantContext::new(org))
            .await
            .unwrap();

        assert!(scoped.is_bound());
        assert_eq!(scoped.bound_org(), Some(org));
        assert_eq!(
            scoped.connection().calls,
            vec![("app.org_id".to_string(), org.to_string())]
        );
    }

    #[tokio::test]
    async fn test_rebind_same_org_is_noop() {
        let ctx = TenantContext::new(OrgId::new_v4());
        let init = SessionInitializer::default();
        let mut scoped = ScopedConnection::new(Recording::default());

        init.bind(&mut scoped, &ctx).await.unwrap();
        init.bind(&mut scoped, &ctx).await.unwrap();

        assert_eq!(scoped.connection().calls.len(), 1);
    }

    #[tokio::test]
    async fn test_rebind_other_org_is_stale() {
        let init = SessionInitializer::default();
        let mut scoped = ScopedConnection::new(Recording::default());

        init.bind(&mut scoped, &TenantContext::new(OrgId::new_v4()))
            .await
            .unwrap();
        let err = init
            .bind(&mut scoped, &TenantContext::new(OrgId::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(err, ScopeError::StaleContext(_)));
    }

    #[tokio::test]
    async fn test_residue_detected() {
        let leftover = Recording {
            value: Some(OrgId::new_v4().to_string()),
            ..Default::default()
        };
        let mut scoped = ScopedConnection::new(leftover);

        let err = SessionInitializer::default()
            .bind(&mut scoped, &TenantContext::new(OrgId::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(err, ScopeError::StaleContext(_)));
        assert!(!scoped.is_bound());
        assert!(scoped.connection().calls.is_empty());
    }

    #[tokio::test]
    async fn test_residue_ignored_without_verification() {
        let leftover = Recording {
            value: Some(OrgId::new_v4().to_string()),
            ..Default::default()
        };
        let org = OrgId::new_v4();
        let mut scoped = ScopedConnection::new(leftover);

        SessionInitializer::new(false)
            .bind(&mut scoped, &TenantContext::new(org))
            .await
            .unwrap();

        assert_eq!(scoped.connection().value, Some(org.to_string()));
    }

    #[tokio::test]
    async fn test_failed_set_is_binding_error() {
        let failing = Recording {
            fail_set: true,
            ..Default::default()
        };
        let mut scoped = ScopedConnection::new(failing);

        let err = SessionInitializer::default()
            .bind(&mut scoped, &TenantContext::new(OrgId::new_v4()))
            .await
            .unwrap_err();

        assert!(matches!(err, ScopeError::Binding(_)));
        assert!(!scoped.is_bound());
    }

    #[tokio::test]
    async fn test_reset_clears_value() {
        let init = SessionInitializer::default();
        let mut scoped = ScopedConnection::new(Recording::default());

        init.bind(&mut scoped, &TenantContext::new(OrgId::new_v4()))
            .await
            .unwrap();
        init.reset(&mut scoped).await.unwrap();

        assert!(!scoped.is_bound());
        assert_eq!(scoped.connection().value.as_deref(), Some(""));
    }
}
