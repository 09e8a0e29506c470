//! Persistent session store
//!
//! Composes the connection manager, a backend's statements and the codec into the
//! host-facing `SessionDataStore`. Every operation checks out one connection, runs
//! its statement(s) under the operation timeout and returns the connection when the
//! guard goes out of scope.

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::SessionQueries;
use crate::codec::{SessionCodec, VersionedJsonCodec};
use crate::config::{DatabaseSettings, StoreConfig, WriteFailurePolicy};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::metrics::StoreMetrics;
use crate::session::{SessionData, SessionRecord, now_millis};
use crate::session_store::SessionDataStore;
use crate::{Error, Result};

/// Session store backed by a database reached through `B`
pub struct PersistentSessionStore<B: SessionQueries> {
    manager: ConnectionManager<B>,
    codec: Arc<dyn SessionCodec>,
    config: StoreConfig,
    metrics: Option<StoreMetrics>,
}

impl<B: SessionQueries> PersistentSessionStore<B> {
    /// Create a store; no connection is made until the first operation
    pub fn new(backend: B, settings: &DatabaseSettings, config: StoreConfig) -> Self {
        let manager = ConnectionManager::new(Arc::new(backend), settings)
            .with_acquire_timeout(config.acquire_timeout);

        Self {
            manager,
            codec: Arc::new(VersionedJsonCodec),
            config,
            metrics: None,
        }
    }

    /// Create a store with settings read from the `SESSIONDB_*` environment
    pub fn from_env(backend: B, config: StoreConfig) -> Self {
        Self::new(backend, &DatabaseSettings::from_env(), config)
    }

    pub fn with_codec(mut self, codec: impl SessionCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.manager = self.manager.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &B {
        self.manager.backend()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&StoreMetrics> {
        self.metrics.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn is_configured(&self) -> bool {
        self.manager.is_configured()
    }

    /// Create or repair the `session_data` schema
    ///
    /// A no-op (with a warning) when no database is configured.
    ///
    /// # Errors
    /// - `Error::ConnectionAcquisition` if no connection could be obtained
    /// - `Error::Schema` if the schema cannot be created or adjusted
    pub async fn bootstrap(&self) -> Result<()> {
        let Some(mut conn) = self.manager.acquire().await? else {
            warn!(
                backend = self.backend().name(),
                "Skipping schema bootstrap, no database configured"
            );
            return Ok(());
        };

        self.bounded(self.backend().bootstrap(&mut conn)).await?;
        info!(backend = self.backend().name(), "Session schema ready");
        Ok(())
    }

    /// Allow operations again after `close()`
    pub async fn start(&self) {
        self.manager.start().await;
    }

    /// Close the connection pool; later operations fail with `Error::StoreClosed`
    pub async fn close(&self) {
        self.manager.close().await;
    }

    /// Close the live pool so the next operation goes through recovery
    pub async fn invalidate_pool(&self) {
        self.manager.invalidate().await;
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.config.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn scan_expired(&self, candidates: &HashSet<String>) -> Result<HashSet<String>> {
        let Some(mut conn) = self.manager.acquire().await? else {
            return Ok(HashSet::new());
        };

        let now = now_millis();
        let ids: Vec<String> = candidates.iter().cloned().collect();
        let mut expired = HashSet::new();

        for chunk in ids.chunks(self.config.expiry_scan_batch_size.max(1)) {
            let found = self
                .bounded(self.backend().find_expired_among(&mut conn, chunk, now))
                .await?;
            expired.extend(found);
        }

        Ok(expired)
    }

    fn observe(&self, operation: &str, outcome: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation(
                self.backend().name(),
                operation,
                outcome,
                started.elapsed().as_secs_f64(),
            );
        }
    }

    fn observe_error(&self, operation: &str, err: &Error) {
        if let Some(metrics) = &self.metrics {
            metrics.record_operation_error(self.backend().name(), operation, err.kind());
        }
    }
}

#[async_trait]
impl<B: SessionQueries> SessionDataStore for PersistentSessionStore<B> {
    async fn store(&self, id: &str, data: &SessionData, last_save_time: i64) -> Result<()> {
        let started = Instant::now();
        let payload = self
            .codec
            .encode(data)
            .inspect_err(|e| self.observe_error("store", e))?;
        let record = SessionRecord::new(id, payload, data.expiry_at);

        let mut conn = match self.manager.acquire().await {
            Ok(Some(conn)) => conn,
            Ok(None) => return Ok(()),
            Err(e) => {
                self.observe_error("store", &e);
                return match self.config.write_policy {
                    _ if matches!(e, Error::StoreClosed) => Err(e),
                    WriteFailurePolicy::BestEffort => {
                        warn!(
                            session_id = %id,
                            error = %e,
                            "Dropping session write, no connection available"
                        );
                        Ok(())
                    }
                    WriteFailurePolicy::Strict => Err(e),
                };
            }
        };

        self.bounded(self.backend().upsert(&mut conn, &record))
            .await
            .inspect_err(|e| self.observe_error("store", e))?;

        let outcome = if last_save_time <= 0 { "insert" } else { "update" };
        debug!(
            session_id = %id,
            expiry_at = record.expiry_at,
            bytes = record.payload.len(),
            outcome,
            "Session stored"
        );
        self.observe("store", outcome, started);
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<SessionData>> {
        let started = Instant::now();
        let Some(mut conn) = self
            .manager
            .acquire()
            .await
            .inspect_err(|e| self.observe_error("load", e))?
        else {
            return Ok(None);
        };

        let record = self
            .bounded(self.backend().find_by_id(&mut conn, id))
            .await
            .inspect_err(|e| self.observe_error("load", e))?;
        drop(conn);

        let Some(record) = record else {
            self.observe("load", "miss", started);
            return Ok(None);
        };

        match self.codec.decode(&record.payload) {
            Ok(data) => {
                self.observe("load", "hit", started);
                Ok(Some(data))
            }
            Err(e) => {
                error!(
                    session_id = %id,
                    error = %e,
                    "Stored session could not be decoded, treating as absent"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_decode_failure(self.backend().name());
                }
                self.observe("load", "decode_error", started);
                Ok(None)
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let started = Instant::now();
        let Some(mut conn) = self
            .manager
            .acquire()
            .await
            .inspect_err(|e| self.observe_error("delete", e))?
        else {
            return Ok(true);
        };

        self.bounded(self.backend().delete_by_id(&mut conn, id))
            .await
            .inspect_err(|e| self.observe_error("delete", e))?;

        debug!(session_id = %id, "Session deleted");
        self.observe("delete", "ok", started);
        Ok(true)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let started = Instant::now();
        let Some(mut conn) = self
            .manager
            .acquire()
            .await
            .inspect_err(|e| self.observe_error("exists", e))?
        else {
            return Ok(false);
        };

        let present = self
            .bounded(self.backend().contains(&mut conn, id))
            .await
            .inspect_err(|e| self.observe_error("exists", e))?;

        self.observe("exists", if present { "hit" } else { "miss" }, started);
        Ok(present)
    }

    async fn get_expired(&self, candidates: &HashSet<String>) -> HashSet<String> {
        if candidates.is_empty() {
            return HashSet::new();
        }

        let started = Instant::now();
        match self.scan_expired(candidates).await {
            Ok(expired) => {
                debug!(
                    candidates = candidates.len(),
                    expired = expired.len(),
                    "Expiry scan complete"
                );
                self.observe("get_expired", "ok", started);
                expired
            }
            Err(e) => {
                warn!(
                    candidates = candidates.len(),
                    error = %e,
                    "Expiry scan failed, reporting no expired sessions"
                );
                self.observe_error("get_expired", &e);
                HashSet::new()
            }
        }
    }

    fn is_passivating(&self) -> bool {
        true
    }
}
