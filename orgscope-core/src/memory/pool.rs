//! A bounded pool of simulated connections.
//!
//! Session settings live on the physical connection and survive a return to
//! the pool, exactly like a Postgres backend process does. A connection that
//! is dropped instead of released goes back to the idle list with whatever it
//! carries, the way a deadpool `Object` does. Idle connections are reused
//! most-recent-first so tests can observe reuse deterministically.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};
use uuid::Uuid;

use super::database::{MemoryDatabase, Record};
use crate::config::{DEFAULT_ACQUIRE_TIMEOUT, ScopeConfig};
use crate::error::{ScopeError, ScopeResult};
use crate::pool::{ConnectionPool, PoolStatus, Seal};
use crate::session::{ORG_SESSION_VARIABLE, SessionConnection};
use crate::tenant::OrgId;

#[derive(Debug)]
struct Physical {
    id: u64,
    settings: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_bind: AtomicBool,
    fail_next_reset: AtomicBool,
    stall_next_bind: AtomicBool,
    stall_next_reset: AtomicBool,
}

#[derive(Debug)]
struct Inner {
    db: MemoryDatabase,
    idle: Mutex<Vec<Physical>>,
    permits: Arc<Semaphore>,
    max_size: usize,
    next_id: AtomicU64,
    live: AtomicUsize,
    waiting: AtomicUsize,
    discarded: AtomicUsize,
    faults: Faults,
}

/// A bounded pool of simulated connections over a [`MemoryDatabase`].
#[derive(Debug, Clone)]
pub struct MemoryPool {
    inner: Arc<Inner>,
    acquire_timeout: Duration,
}

impl MemoryPool {
    /// Create a pool with at most `max_size` connections.
    pub fn new(db: MemoryDatabase, max_size: usize) -> Self {
        Self::build(db, max_size, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// Create a pool using the acquire timeout from `config`.
    pub fn from_config(db: MemoryDatabase, max_size: usize, config: &ScopeConfig) -> Self {
        Self::build(db, max_size, config.acquire_timeout())
    }

    fn build(db: MemoryDatabase, max_size: usize, acquire_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(max_size)),
                max_size,
                next_id: AtomicU64::new(1),
                live: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
                faults: Faults::default(),
            }),
            acquire_timeout,
        }
    }

    /// Set the acquire timeout for this handle and clones made from it.
    ///
    /// Connections, counters and faults are shared with the original handle.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// The shared database.
    pub fn database(&self) -> &MemoryDatabase {
        &self.inner.db
    }

    /// Make the next non-empty `set_config` fail.
    pub fn fail_next_bind(&self) {
        self.inner.faults.fail_next_bind.store(true, Ordering::SeqCst);
    }

    /// Make the next clearing `set_config` fail.
    pub fn fail_next_reset(&self) {
        self.inner.faults.fail_next_reset.store(true, Ordering::SeqCst);
    }

    /// Make the next non-empty `set_config` hang forever after applying its value.
    pub fn stall_next_bind(&self) {
        self.inner.faults.stall_next_bind.store(true, Ordering::SeqCst);
    }

    /// Make the next clearing `set_config` hang forever before applying.
    pub fn stall_next_reset(&self) {
        self.inner.faults.stall_next_reset.store(true, Ordering::SeqCst);
    }

    /// Put an idle connection carrying `value` in `app.org_id` into the pool.
    ///
    /// Stands in for a connection some earlier, broken client returned dirty.
    /// Opens a new connection when none is idle.
    pub fn leave_session_value(&self, value: &str) -> u64 {
        let reused = self.inner.idle.lock().pop();
        let mut physical = match reused {
            Some(p) => p,
            None => self.open(),
        };
        physical
            .settings
            .insert(ORG_SESSION_VARIABLE.to_string(), value.to_string());
        let id = physical.id;
        self.inner.idle.lock().push(physical);
        id
    }

    /// Physical connections opened so far.
    pub fn created(&self) -> u64 {
        self.inner.next_id.load(Ordering::SeqCst) - 1
    }

    /// Physical connections destroyed so far.
    pub fn discarded(&self) -> usize {
        self.inner.discarded.load(Ordering::SeqCst)
    }

    /// Session value left on each idle connection, by connection id.
    pub fn idle_residue(&self) -> Vec<(u64, Option<String>)> {
        self.inner
            .idle
            .lock()
            .iter()
            .map(|p| {
                let value = p
                    .settings
                    .get(ORG_SESSION_VARIABLE)
                    .filter(|v| !v.is_empty())
                    .cloned();
                (p.id, value)
            })
            .collect()
    }

    fn open(&self) -> Physical {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        trace!(connection_id = id, "Opened simulated connection");
        Physical {
            id,
            settings: HashMap::new(),
        }
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Connection = MemoryConnection;

    async fn acquire(&self, _seal: Seal) -> ScopeResult<MemoryConnection> {
        let started = Instant::now();
        let waiting = WaitingGuard::enter(&self.inner.waiting);
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await;
        drop(waiting);

        let permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ScopeError::connection("pool is closed")),
            Err(_) => {
                return Err(ScopeError::pool_exhausted(
                    started.elapsed().as_millis() as u64,
                ));
            }
        };

        let reused = self.inner.idle.lock().pop();
        let physical = match reused {
            Some(p) => p,
            None => self.open(),
        };
        debug!(connection_id = physical.id, "Leased simulated connection");

        Ok(MemoryConnection {
            physical: Some(physical),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    fn release(&self, mut conn: MemoryConnection, _seal: Seal) {
        if let Some(physical) = conn.physical.take() {
            trace!(connection_id = physical.id, "Returned simulated connection");
            self.inner.idle.lock().push(physical);
        }
    }

    fn discard(&self, mut conn: MemoryConnection, _seal: Seal) {
        if let Some(physical) = conn.physical.take() {
            debug!(connection_id = physical.id, "Destroyed simulated connection");
            self.inner.live.fetch_sub(1, Ordering::SeqCst);
            self.inner.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            available: self.inner.idle.lock().len(),
            size: self.inner.live.load(Ordering::SeqCst),
            max_size: self.inner.max_size,
            waiting: self.inner.waiting.load(Ordering::SeqCst),
        }
    }
}

/// Counts one task in `waiting` until dropped, including by cancellation.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A leased simulated connection.
#[derive(Debug)]
pub struct MemoryConnection {
    physical: Option<Physical>,
    pool: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl MemoryConnection {
    fn physical(&self) -> ScopeResult<&Physical> {
        self.physical
            .as_ref()
            .ok_or_else(|| ScopeError::internal("connection already returned"))
    }

    fn session_value(&self) -> ScopeResult<Option<&str>> {
        Ok(self
            .physical()?
            .settings
            .get(ORG_SESSION_VARIABLE)
            .map(String::as_str))
    }

    /// Id of the physical connection behind this lease.
    pub fn physical_id(&self) -> ScopeResult<u64> {
        Ok(self.physical()?.id)
    }

    /// `SELECT * FROM table` under the row filter.
    pub fn list(&self, table: &str) -> ScopeResult<Vec<Record>> {
        let session = self.session_value()?;
        Ok(self.pool.db.select(table, session))
    }

    /// `INSERT INTO table (organization_id, body) VALUES ($1, $2)` under the row filter.
    pub fn insert(&self, table: &str, organization_id: OrgId, body: &str) -> ScopeResult<Record> {
        let session = self.session_value()?;
        self.pool.db.insert(table, session, organization_id, body)
    }

    /// `UPDATE table SET body = $2 WHERE id = $1` under the row filter.
    pub fn update(&self, table: &str, id: Uuid, body: &str) -> ScopeResult<u64> {
        let session = self.session_value()?;
        Ok(self.pool.db.update(table, session, id, body))
    }

    /// `DELETE FROM table WHERE id = $1` under the row filter.
    pub fn delete(&self, table: &str, id: Uuid) -> ScopeResult<u64> {
        let session = self.session_value()?;
        Ok(self.pool.db.delete(table, session, id))
    }
}

#[async_trait]
impl SessionConnection for MemoryConnection {
    async fn set_config(&mut self, name: &str, value: &str) -> ScopeResult<String> {
        let faults = &self.pool.faults;
        if !value.is_empty() && faults.fail_next_bind.swap(false, Ordering::SeqCst) {
            return Err(ScopeError::database("simulated network failure during set_config"));
        }
        if value.is_empty() && faults.fail_next_reset.swap(false, Ordering::SeqCst) {
            return Err(ScopeError::database("simulated network failure during reset"));
        }
        let stall_bind = !value.is_empty() && faults.stall_next_bind.swap(false, Ordering::SeqCst);
        if value.is_empty() && faults.stall_next_reset.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let physical = self
            .physical
            .as_mut()
            .ok_or_else(|| ScopeError::internal("connection already returned"))?;
        physical.settings.insert(name.to_string(), value.to_string());
        if stall_bind {
            // Applied server-side, but the reply never arrives.
            std::future::pending::<()>().await;
        }
        Ok(value.to_string())
    }

    async fn current_setting(&mut self, name: &str) -> ScopeResult<Option<String>> {
        Ok(self
            .physical()?
            .settings
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(physical) = self.physical.take() {
            debug!(
                connection_id = physical.id,
                "Simulated connection dropped, returning it as is"
            );
            self.pool.idle.lock().push(physical);
        }
    }
}
