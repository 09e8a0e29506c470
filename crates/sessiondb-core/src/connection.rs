//! Connection manager
//!
//! Owns the lazily-built connection pool shared by every store operation.
//!
//! States:
//! - Uninitialized: no pool yet (or the last recovery failed)
//! - Active: a pool exists and is handed out
//! - Closed: the store was shut down; acquisitions fail until `start()`
//!
//! Transitions:
//! - Uninitialized → Active: first `acquire()`, built once under the lifecycle lock
//! - Active → Active: acquisition failed, pool torn down and rebuilt once
//! - Active → Uninitialized: acquisition failed again after the rebuild
//! - any → Closed: `close()`
//! - Closed → Uninitialized: `start()`
//!
//! Only construction, recovery and teardown take the lifecycle lock. Steady-state
//! acquisitions clone the pool handle under a short read lock and rely on the
//! backend pool being safe for concurrent checkout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::PoolProvider;
use crate::config::{ConnectionTarget, DatabaseSettings};
use crate::metrics::StoreMetrics;
use crate::{Error, Result};

/// Connection manager states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized = 0,
    Active = 1,
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Active,
            2 => ConnectionState::Closed,
            _ => ConnectionState::Uninitialized,
        }
    }
}

pub struct ConnectionManager<B: PoolProvider> {
    backend: Arc<B>,
    /// `None` when the settings were incomplete at construction
    target: Option<ConnectionTarget>,
    acquire_timeout: Option<Duration>,
    state: AtomicU8,
    pool: RwLock<Option<Arc<B::Pool>>>,
    lifecycle: Mutex<()>,
    warned_unconfigured: AtomicBool,
    metrics: Option<StoreMetrics>,
}

impl<B: PoolProvider> ConnectionManager<B> {
    /// Create a manager; the settings are resolved once, here
    pub fn new(backend: Arc<B>, settings: &DatabaseSettings) -> Self {
        let target = settings.target(backend.requires_credentials());
        if target.is_none() {
            debug!(
                backend = backend.name(),
                missing = ?settings.missing(backend.requires_credentials()),
                "Database settings incomplete"
            );
        }

        Self {
            backend,
            target,
            acquire_timeout: None,
            state: AtomicU8::new(ConnectionState::Uninitialized as u8),
            pool: RwLock::new(None),
            lifecycle: Mutex::new(()),
            warned_unconfigured: AtomicBool::new(false),
            metrics: None,
        }
    }

    /// Bound pool construction and each checkout
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    /// Check out a connection
    ///
    /// Returns `Ok(None)` when no database is configured. On failure the pool is
    /// rebuilt once and acquisition retried before giving up.
    ///
    /// # Errors
    /// - `Error::StoreClosed` after `close()`
    /// - `Error::ConnectionAcquisition` if the retry after a rebuild also fails
    pub async fn acquire(&self) -> Result<Option<B::Connection>> {
        let Some(target) = self.target.as_ref() else {
            if !self.warned_unconfigured.swap(true, Ordering::Relaxed) {
                warn!(
                    backend = self.backend.name(),
                    "No database configured, session store operations are no-ops"
                );
            }
            return Ok(None);
        };

        if self.state() == ConnectionState::Closed {
            return Err(Error::StoreClosed);
        }

        let started = Instant::now();
        let (failed_pool, error) = match self.pool_or_init(target).await {
            Ok(pool) => match self.checkout(&pool).await {
                Ok(conn) => {
                    self.observe_acquire(started);
                    return Ok(Some(conn));
                }
                Err(e) => (Some(pool), e),
            },
            Err(Error::StoreClosed) => return Err(Error::StoreClosed),
            Err(e) => (None, e),
        };

        warn!(
            backend = self.backend.name(),
            error = %error,
            "Failed to acquire connection, rebuilding pool"
        );

        let conn = self.recover(target, failed_pool).await?;
        self.observe_acquire(started);
        Ok(Some(conn))
    }

    /// Shut down: close the pool if present. Idempotent.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        let previous = ConnectionState::from(
            self.state
                .swap(ConnectionState::Closed as u8, Ordering::AcqRel),
        );

        if let Some(pool) = self.take_pool() {
            self.backend.close(&pool).await;
        }

        if previous != ConnectionState::Closed {
            info!(backend = self.backend.name(), "Connection manager closed");
        }
    }

    /// Reopen after `close()`; the next acquisition builds a fresh pool
    pub async fn start(&self) {
        let _guard = self.lifecycle.lock().await;
        if self
            .state
            .compare_exchange(
                ConnectionState::Closed as u8,
                ConnectionState::Uninitialized as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!(backend = self.backend.name(), "Connection manager restarted");
        }
    }

    /// Close the live pool but keep the manager Active
    ///
    /// The next `acquire()` sees a dead pool and goes through recovery. Used to
    /// simulate a backing store that dropped every connection.
    pub async fn invalidate(&self) {
        let _guard = self.lifecycle.lock().await;
        if let Some(pool) = self.current_pool() {
            warn!(backend = self.backend.name(), "Invalidating connection pool");
            self.backend.close(&pool).await;
        }
    }

    async fn pool_or_init(&self, target: &ConnectionTarget) -> Result<Arc<B::Pool>> {
        if let Some(pool) = self.current_pool() {
            return Ok(pool);
        }

        let _guard = self.lifecycle.lock().await;

        // Another caller may have finished while we waited
        if self.state() == ConnectionState::Closed {
            return Err(Error::StoreClosed);
        }
        if let Some(pool) = self.current_pool() {
            return Ok(pool);
        }

        let pool = Arc::new(self.build_pool(target).await?);
        self.set_pool(Some(pool.clone()));
        self.state
            .store(ConnectionState::Active as u8, Ordering::Release);
        Ok(pool)
    }

    /// One rebuild-and-retry cycle, serialized by the lifecycle lock
    async fn recover(
        &self,
        target: &ConnectionTarget,
        failed: Option<Arc<B::Pool>>,
    ) -> Result<B::Connection> {
        let _guard = self.lifecycle.lock().await;

        if self.state() == ConnectionState::Closed {
            return Err(Error::StoreClosed);
        }

        let current = self.current_pool();
        let replaced_by_peer = match (&current, &failed) {
            (Some(current), Some(failed)) => !Arc::ptr_eq(current, failed),
            (Some(_), None) => true,
            (None, _) => false,
        };

        let pool = match current {
            Some(pool) if replaced_by_peer => {
                debug!(
                    backend = self.backend.name(),
                    "Pool already rebuilt by a concurrent caller"
                );
                pool
            }
            current => {
                if let Some(old) = current {
                    self.backend.close(&old).await;
                }
                self.set_pool(None);

                match self.build_pool(target).await {
                    Ok(pool) => {
                        let pool = Arc::new(pool);
                        self.set_pool(Some(pool.clone()));
                        self.state
                            .store(ConnectionState::Active as u8, Ordering::Release);
                        pool
                    }
                    Err(e) => {
                        self.reset_uninitialized();
                        if let Some(metrics) = &self.metrics {
                            metrics.record_pool_rebuild(self.backend.name(), false);
                        }
                        return Err(into_acquisition_error(e));
                    }
                }
            }
        };

        match self.checkout(&pool).await {
            Ok(conn) => {
                if !replaced_by_peer {
                    info!(backend = self.backend.name(), "Connection pool rebuilt");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_pool_rebuild(self.backend.name(), true);
                    }
                }
                Ok(conn)
            }
            Err(e) => {
                self.backend.close(&pool).await;
                self.set_pool(None);
                self.reset_uninitialized();
                if let Some(metrics) = &self.metrics {
                    metrics.record_pool_rebuild(self.backend.name(), false);
                }
                warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Connection still unavailable after pool rebuild"
                );
                Err(into_acquisition_error(e))
            }
        }
    }

    async fn build_pool(&self, target: &ConnectionTarget) -> Result<B::Pool> {
        let pool = self
            .bounded(self.backend.connect(target))
            .await
            .map_err(into_acquisition_error)?;

        info!(
            backend = self.backend.name(),
            endpoint = %target.endpoint,
            "Connection pool created"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_pool_created(self.backend.name());
        }
        Ok(pool)
    }

    async fn checkout(&self, pool: &B::Pool) -> Result<B::Connection> {
        self.bounded(self.backend.acquire(pool)).await
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                Error::ConnectionAcquisition(format!(
                    "timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => fut.await,
        }
    }

    fn observe_acquire(&self, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_pool_acquire(started.elapsed().as_secs_f64());
        }
    }

    fn reset_uninitialized(&self) {
        self.set_pool(None);
        self.state
            .store(ConnectionState::Uninitialized as u8, Ordering::Release);
    }

    fn current_pool(&self) -> Option<Arc<B::Pool>> {
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_pool(&self, pool: Option<Arc<B::Pool>>) {
        *self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = pool;
    }

    fn take_pool(&self) -> Option<Arc<B::Pool>> {
        self.pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

fn into_acquisition_error(error: Error) -> Error {
    match error {
        Error::ConnectionAcquisition(_) | Error::StoreClosed => error,
        other => Error::ConnectionAcquisition(other.to_string()),
    }
}
