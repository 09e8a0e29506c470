//! Backend traits
//!
//! A backend supplies two things: a pool of connections (`PoolProvider`) and the
//! handful of statements the store runs over one of those connections
//! (`SessionQueries`). The connection manager and the facade are written against
//! these traits only.
//!
//! Implementations:
//! - `MemoryBackend`: in-process map, for tests and single-node development
//! - `SqliteBackend`: SQLite file via sqlx (`sessiondb-sqlite`)
//! - `PostgresBackend`: PostgreSQL via sqlx (`sessiondb-postgres`)

use async_trait::async_trait;
use std::collections::HashSet;

use crate::{Result, config::ConnectionTarget, session::SessionRecord};

/// Builds, hands out and tears down pooled connections
#[async_trait]
pub trait PoolProvider: Send + Sync + 'static {
    /// Shared pool handle
    type Pool: Send + Sync + 'static;

    /// Connection checked out of the pool
    ///
    /// Must return itself to the pool when dropped.
    type Connection: Send + 'static;

    /// Backend name used in logs and metrics labels
    fn name(&self) -> &'static str;

    /// Whether principal and credential must be configured
    fn requires_credentials(&self) -> bool {
        true
    }

    /// Construct a new pool for `target`
    ///
    /// # Errors
    /// - `Error::ConnectionAcquisition` if the backing store is unreachable
    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Pool>;

    /// Check a connection out of `pool`
    ///
    /// # Errors
    /// - `Error::ConnectionAcquisition` if the pool is exhausted, closed or broken
    async fn acquire(&self, pool: &Self::Pool) -> Result<Self::Connection>;

    /// Release every resource held by `pool`; later acquisitions must fail
    async fn close(&self, pool: &Self::Pool);
}

/// Statements against the `session_data` collection
#[async_trait]
pub trait SessionQueries: PoolProvider {
    /// Create or repair the schema; safe to run repeatedly
    ///
    /// # Errors
    /// - `Error::Schema` if the schema cannot be created or adjusted
    async fn bootstrap(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Insert or replace the record stored under `record.id`
    async fn upsert(&self, conn: &mut Self::Connection, record: &SessionRecord) -> Result<()>;

    async fn find_by_id(&self, conn: &mut Self::Connection, id: &str) -> Result<Option<SessionRecord>>;

    /// Presence check that does not read the payload
    async fn contains(&self, conn: &mut Self::Connection, id: &str) -> Result<bool>;

    /// Ids among `candidates` whose stored expiry is `<= now`
    ///
    /// Ids without a stored record are never returned. An empty candidate list
    /// returns an empty set without running a statement.
    async fn find_expired_among(
        &self,
        conn: &mut Self::Connection,
        candidates: &[String],
        now: i64,
    ) -> Result<HashSet<String>>;

    /// Remove the record for `id`; a missing id is not an error
    async fn delete_by_id(&self, conn: &mut Self::Connection, id: &str) -> Result<()>;
}
