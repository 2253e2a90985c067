//! Property tests for tenant isolation over the simulated pool.
//!
//! The simulated connections keep session settings across leases the way a
//! Postgres backend does, so every property here is checked against real
//! connection reuse rather than fresh connections.

use orgscope::memory::{MemoryDatabase, MemoryPool, current_org};
use orgscope::{
    ContextResolver, ORG_SESSION_VARIABLE, OrgId, ScopeError, SessionConnection,
    StaticMembership, TenantContext, TenantCredentials, TenantPool, TenantResolver,
};
use proptest::prelude::*;

const TABLE: &str = "units";

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// How a unit of work ends.
#[derive(Debug, Clone, Copy)]
enum Ending {
    Release,
    Drop,
    FailedReset,
    QueryError,
}

fn arb_ending() -> impl Strategy<Value = Ending> {
    prop_oneof![
        Just(Ending::Release),
        Just(Ending::Drop),
        Just(Ending::FailedReset),
        Just(Ending::QueryError),
    ]
}

// Strategy: SQL metacharacters, control sequences and near-miss UUIDs.
fn arb_hostile() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        prop::string::string_regex("[';\\\\\"$ -]{0,24}").unwrap(),
        Just("'; DROP TABLE units; --".to_string()),
        Just("00000000-0000-0000-0000-000000000000".to_string()),
        Just("x' OR '1'='1".to_string()),
        Just("\0\r\n".to_string()),
        prop::string::string_regex("[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{11}").unwrap(),
    ]
}

/// Seed `rows[i]` rows for org `i` and return the orgs.
async fn seed(pool: &TenantPool<MemoryPool>, rows: &[usize]) -> Vec<OrgId> {
    let mut orgs = Vec::with_capacity(rows.len());
    for &n in rows {
        let org = OrgId::new_v4();
        let mut uow = pool.begin(TenantContext::new(org)).await.unwrap();
        for i in 0..n {
            uow.connection()
                .unwrap()
                .insert(TABLE, org, &format!("row {i}"))
                .unwrap();
        }
        uow.release().await.unwrap();
        orgs.push(org);
    }
    orgs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: a session with no tenant sees no rows, whatever else exists.
    #[test]
    fn proptest_unbound_session_sees_nothing(rows in prop::collection::vec(0usize..5, 1..5)) {
        let visible = runtime().block_on(async {
            let memory = MemoryPool::new(MemoryDatabase::new(), 1);
            let pool = TenantPool::with_defaults(memory.clone());
            let orgs = seed(&pool, &rows).await;

            let mut uow = pool.begin(TenantContext::new(orgs[0])).await.unwrap();
            uow.unbind().await.unwrap();
            let unbound = uow.connection().unwrap().list(TABLE).unwrap().len();
            uow.release().await.unwrap();

            // Returned connections are idle and carry no tenant.
            let residue = memory.idle_residue().into_iter().filter(|(_, v)| v.is_some()).count();

            (unbound, residue)
        });
        prop_assert_eq!(visible, (0, 0));
    }

    /// Property: malformed or empty session values fail closed.
    #[test]
    fn proptest_garbage_session_value_fails_closed(value in arb_hostile()) {
        let visible = runtime().block_on(async {
            let memory = MemoryPool::new(MemoryDatabase::new(), 1);
            let pool = TenantPool::with_defaults(memory.clone());
            seed(&pool, &[3, 2]).await;

            // Business code overwrites the session value behind the binder's back.
            let mut uow = pool.begin(TenantContext::new(OrgId::new_v4())).await.unwrap();
            let conn = uow.connection().unwrap();
            conn.set_config(ORG_SESSION_VARIABLE, &value).await.unwrap();
            let visible = conn.list(TABLE).unwrap().len();
            uow.release().await.unwrap();
            visible
        });

        // The seeded orgs are random, so even a well-formed value owns nothing.
        prop_assert_eq!(visible, 0);
        if value.trim().is_empty() {
            prop_assert_eq!(current_org(Some(&value)), None);
        }
    }

    /// Property: no unit of work bound to B observes, changes or forges A's rows.
    #[test]
    fn proptest_cross_tenant_isolation(rows in prop::collection::vec(1usize..4, 2..5)) {
        let violations = runtime().block_on(async {
            let memory = MemoryPool::new(MemoryDatabase::new(), 2);
            let pool = TenantPool::with_defaults(memory.clone());
            let orgs = seed(&pool, &rows).await;

            let mut violations = Vec::new();
            for (a_idx, &a) in orgs.iter().enumerate() {
                let mut owner = pool.begin(TenantContext::new(a)).await.unwrap();
                let owned = owner.connection().unwrap().list(TABLE).unwrap();
                owner.release().await.unwrap();
                if owned.len() != rows[a_idx] {
                    violations.push(format!("{a} sees {} of its {} rows", owned.len(), rows[a_idx]));
                }

                for &b in orgs.iter().filter(|&&b| b != a) {
                    let mut uow = pool.begin(TenantContext::new(b)).await.unwrap();
                    let conn = uow.connection().unwrap();

                    if conn.list(TABLE).unwrap().iter().any(|r| r.organization_id == a) {
                        violations.push(format!("{b} read a row of {a}"));
                    }
                    for row in &owned {
                        if conn.update(TABLE, row.id, "hijacked").unwrap() != 0 {
                            violations.push(format!("{b} updated a row of {a}"));
                        }
                        if conn.delete(TABLE, row.id).unwrap() != 0 {
                            violations.push(format!("{b} deleted a row of {a}"));
                        }
                    }
                    if !matches!(conn.insert(TABLE, a, "forged"), Err(ScopeError::PolicyViolation(_))) {
                        violations.push(format!("{b} inserted a row owned by {a}"));
                    }
                    uow.release().await.unwrap();
                }
            }

            let total: usize = rows.iter().sum();
            if memory.database().unfiltered_count(TABLE) != total {
                violations.push("row count changed".to_string());
            }
            violations
        });
        prop_assert!(violations.is_empty(), "{:?}", violations);
    }

    /// Property: on a single reused connection, unit N+1 sees exactly its own
    /// tenant, however unit N ended.
    #[test]
    fn proptest_no_leakage_across_reuse(
        steps in prop::collection::vec((0usize..3, arb_ending()), 1..16)
    ) {
        let failures = runtime().block_on(async {
            let memory = MemoryPool::new(MemoryDatabase::new(), 1);
            let pool = TenantPool::with_defaults(memory.clone());
            let orgs = seed(&pool, &[1, 2, 3]).await;

            let mut failures = Vec::new();
            for (i, &(who, ending)) in steps.iter().enumerate() {
                let org = orgs[who];
                let mut uow = pool.begin(TenantContext::new(org)).await.unwrap();
                let seen = uow.connection().unwrap().list(TABLE).unwrap();

                if seen.len() != who + 1 || seen.iter().any(|r| r.organization_id != org) {
                    failures.push(format!("step {i}: {org} saw {} rows", seen.len()));
                }

                match ending {
                    Ending::Release => uow.release().await.unwrap(),
                    Ending::Drop => drop(uow),
                    Ending::FailedReset => {
                        memory.fail_next_reset();
                        let _ = uow.release().await;
                    }
                    Ending::QueryError => {
                        let foreign = orgs[(who + 1) % orgs.len()];
                        let forged = uow.connection().unwrap().insert(TABLE, foreign, "forged");
                        if forged.is_ok() {
                            failures.push(format!("step {i}: {org} wrote as {foreign}"));
                        }
                        uow.release().await.unwrap();
                    }
                }

                if memory.idle_residue().iter().any(|(_, v)| v.is_some()) {
                    failures.push(format!("step {i}: idle connection kept a tenant"));
                }
            }
            failures
        });
        prop_assert!(failures.is_empty(), "{:?}", failures);
    }

    /// Property: binding the same tenant again changes nothing.
    #[test]
    fn proptest_rebind_is_idempotent(rows in prop::collection::vec(0usize..4, 1..4), rebinds in 1usize..4) {
        let (once, again) = runtime().block_on(async {
            let pool = TenantPool::with_defaults(MemoryPool::new(MemoryDatabase::new(), 1));
            let orgs = seed(&pool, &rows).await;

            let mut uow = pool.begin(TenantContext::new(orgs[0])).await.unwrap();
            let once = uow.connection().unwrap().list(TABLE).unwrap();
            for _ in 0..rebinds {
                uow.rebind().await.unwrap();
            }
            let again = uow.connection().unwrap().list(TABLE).unwrap();
            uow.release().await.unwrap();
            (once, again)
        });
        prop_assert_eq!(once, again);
    }

    /// Property: hostile identifiers are rejected before any statement runs,
    /// and anything accepted is bound as a canonical UUID.
    #[test]
    fn proptest_hostile_identifier_is_data(raw in arb_hostile()) {
        let allowed = OrgId::new_v4();
        let (outcome, created) = runtime().block_on(async {
            let memory = MemoryPool::new(MemoryDatabase::new(), 1);
            let pool = TenantPool::with_defaults(memory.clone());
            let resolver = ContextResolver::new(StaticMembership::new()).allow_header_only([allowed]);

            let outcome = match resolver.resolve(&TenantCredentials::from_header(raw.clone())).await {
                Ok(ctx) => {
                    let mut uow = pool.begin(ctx).await.unwrap();
                    let bound = uow
                        .connection()
                        .unwrap()
                        .current_setting(ORG_SESSION_VARIABLE)
                        .await
                        .unwrap();
                    uow.release().await.unwrap();
                    Ok(bound)
                }
                Err(e) => Err(e),
            };
            (outcome, memory.created())
        });

        match outcome {
            Ok(bound) => {
                let bound = bound.unwrap_or_default();
                prop_assert_eq!(bound.len(), 36);
                prop_assert!(bound.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
                prop_assert_eq!(bound, allowed.to_string());
            }
            Err(e) => {
                prop_assert!(e.is_context_error());
                prop_assert_eq!(created, 0);
            }
        }
    }
}
