//! Benchmarks for tenant resolution and unit-of-work overhead.
//!
//! Run with: cargo bench --package orgscope-core --bench scope_bench

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use orgscope_core::memory::{MemoryDatabase, MemoryPool};
use orgscope_core::tenant::{RlsConfig, RlsManager};
use orgscope_core::{
    ContextResolver, OrgId, Principal, ScopeConfig, StaticMembership, TenantContext,
    TenantCredentials, TenantPool, TenantResolver, UserId,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

fn bench_org_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope/org_id");
    let raw = OrgId::new_v4().to_string();

    group.bench_function("parse_valid", |b| b.iter(|| black_box(OrgId::parse(&raw))));
    group.bench_function("parse_malformed", |b| {
        b.iter(|| black_box(OrgId::parse("'; DROP TABLE units; --")))
    });

    group.finish();
}

fn bench_resolver(c: &mut Criterion) {
    let rt = runtime();
    let members = StaticMembership::new();
    let user = UserId::new_v4();
    let org = OrgId::new_v4();
    members.grant(user, org);
    let resolver = ContextResolver::new(members);
    let creds = TenantCredentials::from_header(org.to_string()).with_principal(Principal::new(user));

    let mut group = c.benchmark_group("scope/resolver");
    group.bench_function("resolve_member", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(resolver.resolve(&creds).await) })
    });
    group.finish();
}

fn bench_unit_of_work(c: &mut Criterion) {
    let rt = runtime();
    let org = OrgId::new_v4();

    let mut group = c.benchmark_group("scope/unit_of_work");
    for verify in [true, false] {
        let config = ScopeConfig::new().with_verify_residual(verify);
        let pool = TenantPool::new(MemoryPool::new(MemoryDatabase::new(), 4), &config);
        let name = if verify { "begin_release_verified" } else { "begin_release" };

        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async {
                let uow = pool.begin(TenantContext::new(org)).await;
                if let Ok(uow) = uow {
                    black_box(uow.release().await).ok();
                }
            })
        });
    }
    group.finish();
}

fn bench_rls_sql(c: &mut Criterion) {
    let rls = RlsManager::new(
        RlsConfig::new("organization_id")
            .with_role("app_user")
            .add_tables((0..20).map(|i| format!("table_{i}"))),
    );

    c.bench_function("scope/rls_setup_sql_20_tables", |b| {
        b.iter(|| black_box(rls.setup_sql()))
    });
}

criterion_group!(
    benches,
    bench_org_id,
    bench_resolver,
    bench_unit_of_work,
    bench_rls_sql,
);

criterion_main!(benches);
