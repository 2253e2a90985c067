//! Live isolation probe.
//!
//! Creates a scratch table protected by the generated policies, then checks
//! against a real server that:
//!
//! 1. the application role cannot bypass row-level security;
//! 2. a row created under organization A is invisible under B;
//! 3. an unbound connection sees nothing, and rebinding A restores the row;
//! 4. a reused physical connection leased for B sees nothing of A;
//! 5. a write under B naming A is rejected by `WITH CHECK`;
//! 6. a malformed session value matches no row.
//!
//! The scratch table is dropped afterwards, whatever the outcome.

use std::fmt;

use orgscope_core::tenant::{RlsConfig, RlsManager};
use orgscope_core::{
    ORG_SESSION_VARIABLE, OrgId, PrivilegedPool, ScopeError, ScopeResult, SessionConnection,
    TenantContext, TenantPool, UnitOfWork,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::pool::PgPool;

/// Scratch table used by the probe.
pub const PROBE_TABLE: &str = "orgscope_probe";

/// Outcome of one proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOutcome {
    /// Short name.
    pub name: &'static str,
    /// Whether the proof held.
    pub passed: bool,
    /// What was observed.
    pub detail: String,
}

/// All proof outcomes from one probe run.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Outcomes in execution order.
    pub outcomes: Vec<ProofOutcome>,
}

impl ProbeReport {
    fn record(&mut self, name: &'static str, passed: bool, detail: impl Into<String>) {
        let detail = detail.into();
        if passed {
            info!(proof = name, detail = %detail, "Probe proof held");
        } else {
            warn!(proof = name, detail = %detail, "Probe proof failed");
        }
        self.outcomes.push(ProofOutcome {
            name,
            passed,
            detail,
        });
    }

    /// Whether every proof held.
    pub fn all_passed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.passed)
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for o in &self.outcomes {
            let mark = if o.passed { "ok  " } else { "FAIL" };
            writeln!(f, "{mark} {:<24} {}", o.name, o.detail)?;
        }
        Ok(())
    }
}

/// Runs the probe.
///
/// `app` must be a single-connection pool for the application role so the
/// reuse proof leases the same physical connection twice.
pub struct Probe {
    admin: PrivilegedPool<PgPool>,
    app: TenantPool<PgPool>,
    app_role: String,
}

impl Probe {
    /// Create a probe over an admin pool and an application pool.
    pub fn new(admin: PgPool, app: TenantPool<PgPool>, app_role: impl Into<String>) -> Self {
        Self {
            admin: admin.into_privileged(),
            app,
            app_role: app_role.into(),
        }
    }

    /// Run every proof and drop the scratch table.
    pub async fn run(&self) -> ScopeResult<ProbeReport> {
        let mut report = ProbeReport::default();

        self.check_role(&mut report).await?;
        if !report.all_passed() {
            return Ok(report);
        }

        self.create_table().await?;
        let proofs = self.run_proofs(&mut report).await;
        let dropped = self.drop_table().await;

        proofs?;
        dropped?;
        Ok(report)
    }

    async fn check_role(&self, report: &mut ProbeReport) -> ScopeResult<()> {
        let role = self.app_role.clone();
        let flags = self
            .admin
            .run("probe: inspect application role", |conn| {
                Box::pin(async move {
                    let row = conn
                        .query_opt(
                            "SELECT rolsuper, rolbypassrls FROM pg_roles WHERE rolname = $1",
                            &[&role],
                        )
                        .await?;
                    match row {
                        Some(row) => {
                            let superuser: bool = row.try_get(0).map_err(crate::PgError::from)?;
                            let bypass: bool = row.try_get(1).map_err(crate::PgError::from)?;
                            Ok(Some((superuser, bypass)))
                        }
                        None => Ok(None),
                    }
                })
            })
            .await?;

        match flags {
            Some((false, false)) => {
                report.record("role_cannot_bypass", true, format!("{} is subject to RLS", self.app_role))
            }
            Some((superuser, bypass)) => report.record(
                "role_cannot_bypass",
                false,
                format!("{}: superuser={superuser} bypassrls={bypass}", self.app_role),
            ),
            None => report.record(
                "role_cannot_bypass",
                false,
                format!("role {} does not exist", self.app_role),
            ),
        }
        Ok(())
    }

    async fn create_table(&self) -> ScopeResult<()> {
        let rls = RlsManager::new(
            RlsConfig::new("organization_id")
                .with_role(self.app_role.clone())
                .add_table(PROBE_TABLE),
        );
        let ddl = format!(
            "DROP TABLE IF EXISTS {PROBE_TABLE};
CREATE TABLE {PROBE_TABLE} (
    id uuid PRIMARY KEY,
    organization_id uuid NOT NULL,
    body text NOT NULL
);
GRANT SELECT, INSERT, UPDATE, DELETE ON {PROBE_TABLE} TO {role};
{setup}",
            role = orgscope_core::tenant::quote_ident(&self.app_role),
            setup = rls.setup_sql(),
        );

        self.admin
            .run("probe: create scratch table", |conn| {
                Box::pin(async move {
                    conn.batch_execute(&ddl).await?;
                    Ok(())
                })
            })
            .await
    }

    async fn drop_table(&self) -> ScopeResult<()> {
        self.admin
            .run("probe: drop scratch table", |conn| {
                Box::pin(async move {
                    conn.batch_execute(&format!("DROP TABLE IF EXISTS {PROBE_TABLE}"))
                        .await?;
                    Ok(())
                })
            })
            .await
    }

    async fn run_proofs(&self, report: &mut ProbeReport) -> ScopeResult<()> {
        let org_a = OrgId::new_v4();
        let org_b = OrgId::new_v4();

        // Create under A.
        let mut uow = self.app.begin(TenantContext::new(org_a)).await?;
        insert(&mut uow, org_a, "unit 1").await?;
        let pid_a = backend_pid(&mut uow).await?;
        uow.release().await?;

        // List under B.
        let mut uow = self.app.begin(TenantContext::new(org_b)).await?;
        let seen = count(&mut uow).await?;
        let pid_b = backend_pid(&mut uow).await?;
        uow.release().await?;
        report.record(
            "cross_tenant_read",
            seen == 0,
            format!("B sees {seen} of A's rows"),
        );
        report.record(
            "reused_connection",
            seen == 0 && pid_a == pid_b,
            format!("backend {pid_a} then {pid_b}, B sees {seen} rows"),
        );

        // Unbound, then rebound.
        let mut uow = self.app.begin(TenantContext::new(org_a)).await?;
        uow.unbind().await?;
        let unbound = count(&mut uow).await?;
        uow.rebind().await?;
        let rebound = count(&mut uow).await?;
        uow.release().await?;
        report.record(
            "unbound_sees_nothing",
            unbound == 0,
            format!("unbound session sees {unbound} rows"),
        );
        report.record(
            "rebind_restores",
            rebound == 1,
            format!("rebound A sees {rebound} rows"),
        );

        // Foreign write under B.
        let mut uow = self.app.begin(TenantContext::new(org_b)).await?;
        let write = insert(&mut uow, org_a, "smuggled").await;
        uow.release().await?;
        report.record(
            "foreign_write_rejected",
            matches!(write, Err(ScopeError::PolicyViolation(_))),
            match write {
                Ok(()) => "insert naming A succeeded under B".to_string(),
                Err(e) => format!("{} ({})", e.code(), e),
            },
        );

        // Malformed session value.
        let matched = self
            .admin
            .run("probe: malformed session value", |conn| {
                Box::pin(async move {
                    conn.set_config(ORG_SESSION_VARIABLE, "not-a-uuid").await?;
                    let row = conn.query_one("SELECT current_org_id() IS NULL", &[]).await?;
                    let is_null: bool = row.try_get(0).map_err(crate::PgError::from)?;
                    Ok(is_null)
                })
            })
            .await?;
        report.record(
            "malformed_fails_closed",
            matched,
            "current_org_id() for 'not-a-uuid'",
        );

        Ok(())
    }
}

async fn insert(uow: &mut UnitOfWork<PgPool>, org: OrgId, body: &str) -> ScopeResult<()> {
    let id = Uuid::new_v4();
    let sql = format!("INSERT INTO {PROBE_TABLE} (id, organization_id, body) VALUES ($1, $2, $3)");
    uow.connection()?
        .execute(&sql, &[&id, org.as_uuid(), &body])
        .await?;
    Ok(())
}

async fn count(uow: &mut UnitOfWork<PgPool>) -> ScopeResult<i64> {
    let sql = format!("SELECT count(*) FROM {PROBE_TABLE}");
    let row = uow.connection()?.query_one(&sql, &[]).await?;
    Ok(row.try_get(0).map_err(crate::PgError::from)?)
}

async fn backend_pid(uow: &mut UnitOfWork<PgPool>) -> ScopeResult<i32> {
    let row = uow
        .connection()?
        .query_one("SELECT pg_backend_pid()", &[])
        .await?;
    Ok(row.try_get(0).map_err(crate::PgError::from)?)
}
