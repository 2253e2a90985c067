//! Connection pool for PostgreSQL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use orgscope_core::pool::{ConnectionPool, PoolStatus, Seal};
use orgscope_core::{PrivilegedPool, ScopeConfig, ScopeResult, TenantPool};
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::{PgError, PgResult};

/// A deadpool-backed PostgreSQL pool.
///
/// Returned connections are recycled with [`RecyclingMethod::Clean`], which
/// runs `RESET ALL` among other statements before the next lease. Tenant
/// scoping does not depend on it: [`TenantPool`] clears the binding itself.
///
/// A `PgPool` cannot lease on its own; wrap it with
/// [`into_tenant_pool`](Self::into_tenant_pool) or
/// [`into_privileged`](Self::into_privileged).
///
/// ```compile_fail
/// use orgscope_core::ConnectionPool;
///
/// async fn lease_unbound(pool: orgscope_postgres::PgPool) {
///     let _raw = pool.acquire().await;
/// }
/// ```
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
    config: Arc<PgConfig>,
}

impl PgPool {
    /// Create a new connection pool from configuration.
    pub async fn new(config: PgConfig) -> PgResult<Self> {
        Self::with_pool_config(config, PoolConfig::default()).await
    }

    /// Create a new connection pool with custom pool configuration.
    pub async fn with_pool_config(config: PgConfig, pool_config: PoolConfig) -> PgResult<Self> {
        if pool_config.max_connections == 0 {
            return Err(PgError::config("max_connections must be greater than zero"));
        }

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Clean,
        };
        let mgr = Manager::from_config(config.to_pg_config(), NoTls, mgr_config);

        let pool = Pool::builder(mgr)
            .max_size(pool_config.max_connections)
            .wait_timeout(Some(pool_config.acquire_timeout))
            .create_timeout(pool_config.create_timeout)
            .recycle_timeout(pool_config.recycle_timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| PgError::config(format!("failed to create pool: {e}")))?;

        info!(
            url = %config.redacted_url(),
            max_connections = pool_config.max_connections,
            acquire_timeout_ms = pool_config.acquire_timeout.as_millis() as u64,
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
        })
    }

    /// Create a builder for configuring the pool.
    pub fn builder() -> PgPoolBuilder {
        PgPoolBuilder::new()
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Wrap this pool as the tenant entry point.
    pub fn into_tenant_pool(self, scope: &ScopeConfig) -> TenantPool<Self> {
        TenantPool::new(self, scope)
    }

    /// Wrap this pool as an audited privileged pool.
    ///
    /// Use a pool connected with a role that bypasses row-level security,
    /// never the application pool.
    pub fn into_privileged(self) -> PrivilegedPool<Self> {
        PrivilegedPool::new(self)
    }

    /// Check if the pool is healthy by running `SELECT 1` on a connection.
    pub async fn is_healthy(&self) -> bool {
        match self.inner.get().await {
            Ok(client) => client.query_one("SELECT 1", &[]).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Close the pool and all connections.
    pub fn close(&self) {
        self.inner.close();
        info!("PostgreSQL connection pool closed");
    }
}

#[async_trait]
impl ConnectionPool for PgPool {
    type Connection = PgConnection;

    async fn acquire(&self, _seal: Seal) -> ScopeResult<PgConnection> {
        let started = Instant::now();
        match self.inner.get().await {
            Ok(client) => {
                debug!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired connection from pool"
                );
                Ok(PgConnection::new(client))
            }
            Err(PoolError::Timeout(kind)) => {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(waited_ms, timeout = ?kind, "Connection pool exhausted");
                Err(PgError::Timeout(waited_ms).into())
            }
            Err(e) => Err(PgError::from(e).into()),
        }
    }

    fn release(&self, conn: PgConnection, _seal: Seal) {
        drop(conn);
    }

    fn discard(&self, conn: PgConnection, _seal: Seal) {
        let client = deadpool_postgres::Object::take(conn.into_object());
        debug!("Detached connection from pool, closing");
        drop(client);
    }

    fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available as usize,
            size: status.size,
            max_size: status.max_size,
            waiting: status.waiting,
        }
    }
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("url", &self.config.redacted_url())
            .field("status", &self.status())
            .finish()
    }
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: usize,
    /// Maximum time to wait for a free connection.
    pub acquire_timeout: Duration,
    /// Maximum time to open a new connection.
    pub create_timeout: Option<Duration>,
    /// Maximum time to recycle a returned connection.
    pub recycle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: orgscope_core::config::DEFAULT_ACQUIRE_TIMEOUT,
            create_timeout: Some(Duration::from_secs(30)),
            recycle_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl PoolConfig {
    /// Take the acquire timeout from a scope configuration.
    pub fn from_scope(scope: &ScopeConfig) -> Self {
        Self {
            acquire_timeout: scope.acquire_timeout(),
            ..Self::default()
        }
    }
}

/// Builder for creating a connection pool.
#[derive(Debug, Default)]
pub struct PgPoolBuilder {
    config: Option<PgConfig>,
    url: Option<String>,
    pool_config: PoolConfig,
}

impl PgPoolBuilder {
    /// Create a new pool builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: PgConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the pool configuration.
    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.pool_config.max_connections = n;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.acquire_timeout = timeout;
        self
    }

    /// Set the connection creation timeout.
    pub fn create_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.create_timeout = Some(timeout);
        self
    }

    /// Build the connection pool.
    pub async fn build(self) -> PgResult<PgPool> {
        let config = if let Some(config) = self.config {
            config
        } else if let Some(url) = self.url {
            PgConfig::from_url(url)?
        } else {
            return Err(PgError::config("no database URL or config provided"));
        };

        PgPool::with_pool_config(config, self.pool_config).await
    }
}
