//! Tower layer that scopes each request to one tenant.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderName, Request};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use orgscope_core::{
    ConnectionPool, Principal, RejectReason, ScopeConfig, ScopeError, ScopeResult,
    TenantCredentials, TenantPool, TenantResolver, UnitOfWork,
};
use tokio::sync::Mutex;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, info, warn};

use crate::rejection::ScopeRejection;

/// The unit of work for one request, shared with its extractors.
///
/// Inserted into request extensions by [`OrgScopeMiddleware`]. When the
/// middleware finishes it takes the unit of work back and releases it; if the
/// request future is dropped first, the last clone drops the unit of work,
/// which destroys the connection.
pub struct RequestScope<P: ConnectionPool> {
    pub(crate) slot: Arc<Mutex<Option<UnitOfWork<P>>>>,
}

impl<P: ConnectionPool> Clone for RequestScope<P> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<P: ConnectionPool> RequestScope<P> {
    fn new(uow: UnitOfWork<P>) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(uow))),
        }
    }

    async fn finish(&self) {
        let uow = self.slot.lock().await.take();
        if let Some(uow) = uow {
            if let Err(e) = uow.release().await {
                warn!(code = %e.code(), error = %e, "Request scope released with errors");
            }
        }
    }
}

struct Shared<P: ConnectionPool> {
    pool: TenantPool<P>,
    resolver: Arc<dyn TenantResolver>,
    header: HeaderName,
}

/// Layer that resolves, binds and releases a tenant connection per request.
///
/// ```rust
/// use axum::{Router, routing::get};
/// use orgscope_axum::{OrgScopeLayer, TenantConn};
/// use orgscope_core::memory::{MemoryDatabase, MemoryPool};
/// use orgscope_core::{ContextResolver, ScopeConfig, StaticMembership, TenantPool};
///
/// async fn units(mut conn: TenantConn<MemoryPool>) -> String {
///     let rows = conn.connection().and_then(|c| c.list("units")).unwrap_or_default();
///     rows.len().to_string()
/// }
///
/// let config = ScopeConfig::new();
/// let pool = TenantPool::new(MemoryPool::new(MemoryDatabase::new(), 8), &config);
/// let resolver = ContextResolver::from_config(StaticMembership::new(), &config);
///
/// let app: Router = Router::new()
///     .route("/units", get(units))
///     .layer(OrgScopeLayer::new(pool, resolver, &config).unwrap());
/// ```
pub struct OrgScopeLayer<P: ConnectionPool> {
    shared: Arc<Shared<P>>,
}

impl<P: ConnectionPool> Clone for OrgScopeLayer<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: ConnectionPool> OrgScopeLayer<P> {
    /// Create the layer. Fails if the configured header name is invalid.
    pub fn new<R>(pool: TenantPool<P>, resolver: R, config: &ScopeConfig) -> ScopeResult<Self>
    where
        R: TenantResolver + 'static,
    {
        let header = HeaderName::from_bytes(config.org_header.as_bytes())
            .map_err(|_| ScopeError::config(format!("invalid header name: {}", config.org_header)))?;

        info!(header = %header, "OrgScopeLayer created");
        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                resolver: Arc::new(resolver),
                header,
            }),
        })
    }
}

impl<S, P: ConnectionPool> Layer<S> for OrgScopeLayer<P> {
    type Service = OrgScopeMiddleware<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        OrgScopeMiddleware {
            inner,
            shared: self.shared.clone(),
        }
    }
}

/// Tower middleware service created by [`OrgScopeLayer`].
pub struct OrgScopeMiddleware<S, P: ConnectionPool> {
    inner: S,
    shared: Arc<Shared<P>>,
}

impl<S: Clone, P: ConnectionPool> Clone for OrgScopeMiddleware<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shared: self.shared.clone(),
        }
    }
}

/// Collect the request's tenant assertions.
///
/// Repeated organization headers with different values are ambiguous.
fn credentials(req: &Request<Body>, header: &HeaderName) -> ScopeResult<TenantCredentials> {
    let mut values = req
        .headers()
        .get_all(header)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string());

    let first = values.next();
    if let Some(first) = &first {
        if values.any(|v| v != *first) {
            return Err(ScopeError::rejected(
                RejectReason::Ambiguous,
                "conflicting organization headers",
            ));
        }
    }

    let mut creds = TenantCredentials::default();
    if let Some(value) = first {
        creds = creds.with_header(value);
    }
    if let Some(principal) = req.extensions().get::<Principal>() {
        creds = creds.with_principal(principal.clone());
    }
    Ok(creds)
}

impl<S, P> Service<Request<Body>> for OrgScopeMiddleware<S, P>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
    P: ConnectionPool,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let shared = self.shared.clone();

        Box::pin(async move {
            let creds = credentials(&req, &shared.header);
            let ctx = match creds {
                Ok(creds) => shared.resolver.resolve(&creds).await,
                Err(e) => {
                    warn!(code = %e.code(), error = %e, "Tenant context rejected");
                    Err(e)
                }
            };
            let ctx = match ctx {
                Ok(ctx) => ctx,
                Err(e) => return Ok(ScopeRejection::from(e).into_response()),
            };

            let uow = match shared.pool.begin(ctx.clone()).await {
                Ok(uow) => uow,
                Err(e) => return Ok(ScopeRejection::from(e).into_response()),
            };

            let scope = RequestScope::new(uow);
            req.extensions_mut().insert(ctx);
            req.extensions_mut().insert(scope.clone());

            debug!(path = %req.uri().path(), "Dispatching tenant-scoped request");
            let response = inner.call(req).await?;

            scope.finish().await;
            Ok(response)
        })
    }
}
