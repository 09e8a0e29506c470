//! PostgreSQL-backed session storage for clustered deployments
//!
//! This crate implements the session statements (`SessionQueries`) and pool
//! provider for PostgreSQL, so several nodes can share one `session_data` table
//! through `PersistentSessionStore`.
//!
//! # Features
//! - Versioned schema migrations tracked in `schema_migrations`
//! - Column type drift repaired in place (`ALTER COLUMN ... TYPE ... USING`)
//! - Expiry scans bound as a single `text[]` parameter
//!
//! # Example
//! ```no_run
//! # use sessiondb_postgres::{PostgresBackend, PostgresStoreConfig};
//! # use sessiondb_core::{SessionDataStore, StoreConfig};
//! # async fn example() -> sessiondb_core::Result<()> {
//! // Settings come from SESSIONDB_URL, SESSIONDB_USERNAME and SESSIONDB_PASSWORD
//! let store = sessiondb_core::PersistentSessionStore::from_env(
//!     PostgresBackend::new(PostgresStoreConfig::default()),
//!     StoreConfig::default(),
//! );
//! store.bootstrap().await?;
//! assert!(!store.exists("missing").await?);
//! # Ok(())
//! # }
//! ```

mod config;
pub mod migrations;
mod postgres_session_store;

pub use config::PostgresStoreConfig;
pub use postgres_session_store::{PostgresBackend, PostgresSessionStore};
