//! Request-level behavior of the org scope layer over the in-memory backend.

use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::routing::{get, post};
use orgscope_axum::{OrgScopeLayer, ScopeRejection, Tenant, TenantConn};
use orgscope_core::memory::{MemoryDatabase, MemoryPool};
use orgscope_core::{
    ContextResolver, OrgId, Principal, ScopeConfig, ScopeError, StaticMembership, TenantContext,
    TenantPool, UserId,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

async fn list_units(mut conn: TenantConn<MemoryPool>) -> Result<String, ScopeRejection> {
    let rows = conn.connection()?.list("units")?;
    Ok(rows.len().to_string())
}

async fn create_unit(
    Tenant(ctx): Tenant,
    mut conn: TenantConn<MemoryPool>,
) -> Result<StatusCode, ScopeRejection> {
    conn.connection()?
        .insert("units", ctx.organization_id(), "unit")?;
    Ok(StatusCode::CREATED)
}

async fn smuggle(mut conn: TenantConn<MemoryPool>) -> Result<StatusCode, ScopeRejection> {
    conn.connection()?.insert("units", OrgId::new_v4(), "foreign")?;
    Ok(StatusCode::CREATED)
}

async fn fail_closed() -> Result<StatusCode, ScopeRejection> {
    Err(ScopeError::policy_violation("forced").into())
}

struct Fixture {
    pool: MemoryPool,
    members: StaticMembership,
    config: ScopeConfig,
}

impl Fixture {
    fn new(max_size: usize) -> Self {
        let config = ScopeConfig::new().with_acquire_timeout(Duration::from_millis(50));
        Self {
            pool: MemoryPool::from_config(MemoryDatabase::new(), max_size, &config),
            members: StaticMembership::new(),
            config,
        }
    }

    fn app(&self) -> Router {
        let tenants = TenantPool::new(self.pool.clone(), &self.config);
        let resolver = ContextResolver::from_config(self.members.clone(), &self.config);
        Router::new()
            .route("/units", get(list_units).post(create_unit))
            .route("/smuggle", post(smuggle))
            .route("/deny", get(fail_closed))
            .layer(OrgScopeLayer::new(tenants, resolver, &self.config).unwrap())
    }

    fn member(&self, org: OrgId) -> Principal {
        let user = UserId::new_v4();
        self.members.grant(user, org);
        Principal::new(user)
    }
}

fn request(method: &str, uri: &str, org: Option<OrgId>, principal: Option<Principal>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(org) = org {
        builder = builder.header("x-org-id", org.to_string());
    }
    let mut req = builder.body(Body::empty()).unwrap();
    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }
    req
}

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(body: Body) -> String {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn header_only_request_is_unauthorized() {
    let fx = Fixture::new(2);
    let org = OrgId::new_v4();

    let resp = fx.app().oneshot(request("GET", "/units", Some(org), None)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"]["code"], "OS1004");
    assert!(!body.to_string().contains(&org.to_string()));
    assert_eq!(fx.pool.created(), 0);
}

#[tokio::test]
async fn non_member_is_forbidden_before_leasing() {
    let fx = Fixture::new(2);
    let org = OrgId::new_v4();
    let outsider = Principal::new(UserId::new_v4());

    let resp = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(outsider)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.pool.created(), 0);
}

#[tokio::test]
async fn missing_identifier_is_forbidden() {
    let fx = Fixture::new(2);
    let principal = Principal::new(UserId::new_v4());

    let resp = fx
        .app()
        .oneshot(request("GET", "/units", None, Some(principal)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn member_sees_only_own_rows() {
    let fx = Fixture::new(1);
    let org_a = OrgId::new_v4();
    let org_b = OrgId::new_v4();
    let alice = fx.member(org_a);
    let bob = fx.member(org_b);

    let created = fx
        .app()
        .oneshot(request("POST", "/units", Some(org_a), Some(alice.clone())))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);

    let as_b = fx
        .app()
        .oneshot(request("GET", "/units", Some(org_b), Some(bob)))
        .await
        .unwrap();
    assert_eq!(as_b.status(), StatusCode::OK);
    assert_eq!(body_text(as_b.into_body()).await, "0");

    let as_a = fx
        .app()
        .oneshot(request("GET", "/units", Some(org_a), Some(alice)))
        .await
        .unwrap();
    assert_eq!(body_text(as_a.into_body()).await, "1");

    // One physical connection served all three requests.
    assert_eq!(fx.pool.created(), 1);
}

#[tokio::test]
async fn connection_returns_clean_after_request() {
    let fx = Fixture::new(2);
    let org = OrgId::new_v4();
    let alice = fx.member(org);

    let resp = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(alice)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let residue = fx.pool.idle_residue();
    assert_eq!(residue.len(), 1);
    assert_eq!(residue[0].1, None);
    assert_eq!(fx.pool.discarded(), 0);
}

#[tokio::test]
async fn foreign_write_is_forbidden() {
    let fx = Fixture::new(1);
    let org = OrgId::new_v4();
    let alice = fx.member(org);

    let resp = fx
        .app()
        .oneshot(request("POST", "/smuggle", Some(org), Some(alice)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.pool.database().unfiltered_count("units"), 0);
}

#[tokio::test]
async fn handler_errors_still_release_the_connection() {
    let fx = Fixture::new(1);
    let org = OrgId::new_v4();
    let alice = fx.member(org);

    let resp = fx
        .app()
        .oneshot(request("GET", "/deny", Some(org), Some(alice)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.pool.idle_residue().len(), 1);
    assert_eq!(fx.pool.discarded(), 0);
}

#[tokio::test]
async fn exhausted_pool_asks_client_to_retry() {
    let fx = Fixture::new(1);
    let org = OrgId::new_v4();
    let alice = fx.member(org);

    let tenants = TenantPool::new(fx.pool.clone(), &fx.config);
    let held = tenants.begin(TenantContext::new(org)).await.unwrap();

    let resp = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(alice)))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(resp.headers()[header::RETRY_AFTER], "1");
    let body = body_json(resp.into_body()).await;
    assert_eq!(body["error"]["code"], "OS3001");

    held.release().await.unwrap();
}

#[tokio::test]
async fn binding_failure_destroys_connection() {
    let fx = Fixture::new(1);
    let org = OrgId::new_v4();
    let alice = fx.member(org);
    fx.pool.fail_next_bind();

    let resp = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(alice.clone())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(fx.pool.discarded(), 1);

    let retry = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(alice)))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn request_cancelled_during_bind_destroys_connection() {
    let fx = Fixture::new(1);
    let org = OrgId::new_v4();
    let alice = fx.member(org);
    fx.pool.stall_next_bind();

    let call = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(alice.clone())));
    assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());

    assert!(fx.pool.idle_residue().is_empty());
    assert_eq!(fx.pool.discarded(), 1);

    let retry = fx
        .app()
        .oneshot(request("GET", "/units", Some(org), Some(alice)))
        .await
        .unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn request_cancelled_during_release_destroys_connection() {
    let fx = Fixture::new(1);
    let org = OrgId::new_v4();
    let alice = fx.member(org);
    fx.pool.stall_next_reset();

    let call = fx
        .app()
        .oneshot(request("POST", "/units", Some(org), Some(alice)));
    assert!(tokio::time::timeout(Duration::from_millis(10), call).await.is_err());

    assert!(fx.pool.idle_residue().is_empty());
    assert_eq!(fx.pool.discarded(), 1);
}
