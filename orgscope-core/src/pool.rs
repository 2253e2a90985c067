//! Pool abstraction and the tenant-scoped entry point built on it.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use crate::config::ScopeConfig;
use crate::error::{ScopeError, ScopeResult};
use crate::scope::UnitOfWork;
use crate::session::{SessionConnection, SessionInitializer};
use crate::tenant::TenantContext;

/// Capability required to lease from or return to a [`ConnectionPool`].
///
/// Backends name it in their impls, but only this crate can create one, so
/// raw connections are reachable only through [`TenantPool`] and
/// [`PrivilegedPool`](crate::PrivilegedPool).
///
/// ```compile_fail
/// let _ = orgscope_core::pool::Seal { _private: () };
/// ```
///
/// ```compile_fail
/// use orgscope_core::ConnectionPool;
/// use orgscope_core::memory::{MemoryDatabase, MemoryPool};
///
/// async fn lease_unbound() {
///     let pool = MemoryPool::new(MemoryDatabase::new(), 1);
///     let _raw = pool.acquire().await;
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Seal {
    _private: (),
}

impl Seal {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// A source of physical connections.
///
/// This is the backend seam: a driver pool (deadpool-postgres) or the
/// in-memory simulation. Every leasing method takes a [`Seal`], so
/// application code cannot call them; it goes through [`TenantPool`], which
/// binds before handing anything out.
#[async_trait]
pub trait ConnectionPool: Clone + Send + Sync + 'static {
    /// The leased connection type.
    type Connection: SessionConnection + Send + 'static;

    /// Lease a connection, waiting at most the pool's acquire timeout.
    async fn acquire(&self, seal: Seal) -> ScopeResult<Self::Connection>;

    /// Return a connection whose session state has been cleared.
    fn release(&self, conn: Self::Connection, seal: Seal);

    /// Destroy a connection whose session state is unknown.
    fn discard(&self, conn: Self::Connection, seal: Seal);

    /// Current pool occupancy.
    fn status(&self) -> PoolStatus;
}

/// Pool status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Number of available (idle) connections.
    pub available: usize,
    /// Current total size of the pool.
    pub size: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
}

/// A raw connection that is destroyed unless it is explicitly returned.
///
/// Dropping a driver connection usually hands it back to its pool as is, so
/// anything holding a lease across an await point keeps it in one of these.
pub(crate) struct Lease<P: ConnectionPool> {
    pool: P,
    conn: Option<P::Connection>,
}

impl<P: ConnectionPool> Lease<P> {
    pub(crate) async fn acquire(pool: &P) -> ScopeResult<Self> {
        let conn = pool.acquire(Seal::new()).await?;
        Ok(Self {
            pool: pool.clone(),
            conn: Some(conn),
        })
    }

    pub(crate) fn connection(&mut self) -> ScopeResult<&mut P::Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| ScopeError::internal("lease already ended"))
    }

    /// Return the connection to the pool.
    pub(crate) fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, Seal::new());
        }
    }

    /// Destroy the connection.
    pub(crate) fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.discard(conn, Seal::new());
        }
    }
}

impl<P: ConnectionPool> Drop for Lease<P> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("Lease dropped before it ended, destroying connection");
            self.pool.discard(conn, Seal::new());
        }
    }
}

/// The only way to obtain a tenant connection.
///
/// Every lease is bound before the caller can touch it, and every lease is
/// cleared or destroyed when its [`UnitOfWork`] ends.
#[derive(Debug, Clone)]
pub struct TenantPool<P> {
    pool: P,
    initializer: SessionInitializer,
}

impl<P: ConnectionPool> TenantPool<P> {
    /// Wrap a backend pool.
    pub fn new(pool: P, config: &ScopeConfig) -> Self {
        Self {
            pool,
            initializer: SessionInitializer::from_config(config),
        }
    }

    /// Wrap a backend pool with default settings.
    pub fn with_defaults(pool: P) -> Self {
        Self {
            pool,
            initializer: SessionInitializer::default(),
        }
    }

    /// Lease and bind a connection for `ctx`.
    pub async fn begin(&self, ctx: TenantContext) -> ScopeResult<UnitOfWork<P>> {
        UnitOfWork::begin(self.pool.clone(), self.initializer, ctx).await
    }

    /// Run `f` inside a unit of work and release it afterwards, whatever `f` returns.
    ///
    /// ```rust,ignore
    /// let units = pool
    ///     .scoped(ctx, |uow| Box::pin(async move {
    ///         uow.connection()?.list("units")
    ///     }))
    ///     .await?;
    /// ```
    pub async fn scoped<F, T>(&self, ctx: TenantContext, f: F) -> ScopeResult<T>
    where
        F: for<'c> FnOnce(&'c mut UnitOfWork<P>) -> BoxFuture<'c, ScopeResult<T>> + Send,
        T: Send,
    {
        let mut uow = self.begin(ctx).await?;
        let result = f(&mut uow).await;

        if let Err(e) = uow.release().await {
            warn!(code = %e.code(), error = %e, "Unit of work released with errors");
        }

        result
    }

    /// Current pool occupancy.
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}
