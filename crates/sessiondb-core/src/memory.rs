//! In-memory backend
//!
//! Keeps records in a `DashMap` shared by every clone of the backend, so a test can
//! hold one handle while the store owns another. Pools are cheap tokens that can be
//! closed; a closed pool refuses checkouts, which is how pool death is simulated.
//! Failure injection counters make the recovery paths reachable from tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::backend::{PoolProvider, SessionQueries};
use crate::config::ConnectionTarget;
use crate::session::SessionRecord;
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    records: DashMap<String, SessionRecord>,
    connects: AtomicUsize,
    queries: AtomicUsize,
    bootstraps: AtomicUsize,
    open_pools: AtomicUsize,
    checked_out: AtomicUsize,
    fail_connects: AtomicUsize,
    fail_acquires: AtomicUsize,
    fail_queries: AtomicUsize,
    connect_delay_ms: AtomicU64,
}

/// Backend storing records in process memory
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

pub struct MemoryPool {
    open: AtomicBool,
}

/// Checked-out connection; releases its slot when dropped
pub struct MemoryConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection").finish_non_exhaustive()
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.inner.checked_out.fetch_sub(1, Ordering::AcqRel);
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every pool construction by `delay`
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.inner
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
        self
    }

    /// Make the next `n` pool constructions fail
    pub fn fail_next_connects(&self, n: usize) {
        self.inner.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` checkouts fail
    pub fn fail_next_acquires(&self, n: usize) {
        self.inner.fail_acquires.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` statements fail with `Error::Database`
    pub fn fail_next_queries(&self, n: usize) {
        self.inner.fail_queries.store(n, Ordering::SeqCst);
    }

    /// Pools constructed so far
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Statements executed so far (bootstrap excluded)
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    pub fn bootstrap_count(&self) -> usize {
        self.inner.bootstraps.load(Ordering::SeqCst)
    }

    pub fn open_pools(&self) -> usize {
        self.inner.open_pools.load(Ordering::SeqCst)
    }

    /// Connections currently checked out
    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::SeqCst)
    }

    pub fn record(&self, id: &str) -> Option<SessionRecord> {
        self.inner.records.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }

    /// Write a record directly, bypassing the codec
    pub fn insert_raw(&self, record: SessionRecord) {
        self.inner.records.insert(record.id.clone(), record);
    }

    fn statement(&self) -> Result<()> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.fail_queries) {
            return Err(Error::Database("injected statement failure".to_string()));
        }
        Ok(())
    }
}

/// Consume one injected failure if any are pending
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl PoolProvider for MemoryBackend {
    type Pool = MemoryPool;
    type Connection = MemoryConnection;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, _target: &ConnectionTarget) -> Result<MemoryPool> {
        let delay = self.inner.connect_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.fail_connects) {
            return Err(Error::ConnectionAcquisition(
                "injected connect failure".to_string(),
            ));
        }

        self.inner.open_pools.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryPool {
            open: AtomicBool::new(true),
        })
    }

    async fn acquire(&self, pool: &MemoryPool) -> Result<MemoryConnection> {
        if !pool.open.load(Ordering::SeqCst) {
            return Err(Error::ConnectionAcquisition("pool is closed".to_string()));
        }
        if take_failure(&self.inner.fail_acquires) {
            return Err(Error::ConnectionAcquisition(
                "injected acquire failure".to_string(),
            ));
        }

        self.inner.checked_out.fetch_add(1, Ordering::AcqRel);
        Ok(MemoryConnection {
            inner: self.inner.clone(),
        })
    }

    async fn close(&self, pool: &MemoryPool) {
        if pool.open.swap(false, Ordering::SeqCst) {
            self.inner.open_pools.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SessionQueries for MemoryBackend {
    async fn bootstrap(&self, _conn: &mut MemoryConnection) -> Result<()> {
        self.inner.bootstraps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, _conn: &mut MemoryConnection, record: &SessionRecord) -> Result<()> {
        self.statement()?;
        self.inner.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        _conn: &mut MemoryConnection,
        id: &str,
    ) -> Result<Option<SessionRecord>> {
        self.statement()?;
        Ok(self.record(id))
    }

    async fn contains(&self, _conn: &mut MemoryConnection, id: &str) -> Result<bool> {
        self.statement()?;
        Ok(self.inner.records.contains_key(id))
    }

    async fn find_expired_among(
        &self,
        _conn: &mut MemoryConnection,
        candidates: &[String],
        now: i64,
    ) -> Result<HashSet<String>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }
        self.statement()?;

        Ok(candidates
            .iter()
            .filter(|id| {
                self.inner
                    .records
                    .get(id.as_str())
                    .is_some_and(|r| r.expiry_at <= now)
            })
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, _conn: &mut MemoryConnection, id: &str) -> Result<()> {
        self.statement()?;
        self.inner.records.remove(id);
        Ok(())
    }
}
