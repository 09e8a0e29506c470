//! Host-facing session store contract
//!
//! The `SessionDataStore` trait is what a session-lifecycle manager talks to. The
//! host owns scheduling (when to save, when to sweep for expired sessions); the
//! store only persists, reads back and answers membership questions.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::{Result, session::SessionData};

/// Session store trait
///
/// Implementations:
/// - `PersistentSessionStore<MemoryBackend>`: in-process map
/// - `SqliteSessionStore`: SQLite file (`sessiondb-sqlite`)
/// - `PostgresSessionStore`: PostgreSQL (`sessiondb-postgres`)
///
/// # Example
/// ```no_run
/// # use sessiondb_core::{SessionData, SessionDataStore, now_millis};
/// # async fn example(store: &dyn SessionDataStore) -> sessiondb_core::Result<()> {
/// let mut data = SessionData::new("abc", now_millis(), 30 * 60 * 1000);
/// data.set_attribute("user", "alice")?;
/// store.store("abc", &data, 0).await?;
///
/// let loaded = store.load("abc").await?;
/// assert_eq!(loaded.map(|d| d.id), Some("abc".to_string()));
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait SessionDataStore: Send + Sync {
    /// Persist a session, replacing any previous record for `id`
    ///
    /// # Arguments
    /// * `id` - Session id the record is keyed by
    /// * `data` - Session state; its `expiry_at` becomes the stored expiry
    /// * `last_save_time` - When the host last saved this session; `<= 0` on first save
    ///
    /// # Errors
    /// - `Error::Serialization` if the session cannot be encoded
    /// - `Error::ConnectionAcquisition` only under `WriteFailurePolicy::Strict`
    /// - `Error::StoreClosed` after `close()`, under either policy
    /// - `Error::Database` / `Error::Timeout` if the statement fails
    async fn store(&self, id: &str, data: &SessionData, last_save_time: i64) -> Result<()>;

    /// Read a session back
    ///
    /// # Returns
    /// `None` when no record exists, when no database is configured, or when the
    /// stored payload cannot be decoded.
    ///
    /// # Errors
    /// - `Error::ConnectionAcquisition` if no connection could be obtained
    /// - `Error::Database` / `Error::Timeout` if the statement fails
    async fn load(&self, id: &str) -> Result<Option<SessionData>>;

    /// Remove a session
    ///
    /// # Returns
    /// `true` once the statement ran, whether or not a record existed.
    ///
    /// # Errors
    /// - `Error::ConnectionAcquisition` if no connection could be obtained
    /// - `Error::Database` / `Error::Timeout` if the statement fails
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Whether a record exists for `id`, without decoding it
    ///
    /// # Errors
    /// - `Error::ConnectionAcquisition` if no connection could be obtained
    /// - `Error::Database` / `Error::Timeout` if the statement fails
    async fn exists(&self, id: &str) -> Result<bool>;

    /// Subset of `candidates` whose stored expiry has passed
    ///
    /// Never fails: any error yields an empty set so the host's sweep simply
    /// tries again next time.
    async fn get_expired(&self, candidates: &HashSet<String>) -> HashSet<String>;

    /// Whether sessions are fully serialized on write and rebuilt on read
    fn is_passivating(&self) -> bool;
}
