//! SQLite session storage for single-node deployments
//!
//! This crate implements the session statements (`SessionQueries`) and pool
//! provider for a SQLite database file, so `PersistentSessionStore` can persist
//! sessions locally.
//!
//! # Features
//! - WAL journal mode and busy timeout for concurrent readers
//! - Idempotent schema bootstrap that rebuilds a drifted `session_data` table
//! - Chunk-friendly expiry scans with bound `IN (...)` lists
//!
//! # Example
//! ```no_run
//! # use sessiondb_sqlite::{SqliteBackend, SqliteStoreConfig};
//! # use sessiondb_core::{SessionData, SessionDataStore, StoreConfig, now_millis};
//! # async fn example() -> sessiondb_core::Result<()> {
//! let store = SqliteBackend::open(
//!     "~/.sessiondb/sessions.db",
//!     SqliteStoreConfig::default(),
//!     StoreConfig::default(),
//! );
//! store.bootstrap().await?;
//!
//! let data = SessionData::new("abc", now_millis(), 30 * 60 * 1000);
//! store.store("abc", &data, 0).await?;
//! # Ok(())
//! # }
//! ```

mod config;
pub mod schema;
mod sqlite_session_store;

pub use config::SqliteStoreConfig;
pub use sqlite_session_store::{SqliteBackend, SqliteSessionStore};
