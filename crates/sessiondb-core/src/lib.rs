//! SessionDB Core Types and Traits
//!
//! This crate provides the pieces every session store backend shares:
//! - Session data model and the codec that turns it into bytes
//! - Backend traits (pool provider, session statements)
//! - Connection manager with lazy pool construction and one-shot recovery
//! - The `PersistentSessionStore` facade implementing `SessionDataStore`
//! - Core error types, configuration and metrics

pub mod backend;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod session;
pub mod session_store;
pub mod store;

pub use backend::{PoolProvider, SessionQueries};
pub use codec::{SessionCodec, VersionedJsonCodec};
pub use config::{ConnectionTarget, DatabaseSettings, StoreConfig, WriteFailurePolicy};
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{Error, Result};
pub use memory::MemoryBackend;
pub use metrics::StoreMetrics;
pub use session::{NEVER_EXPIRES, SessionData, SessionRecord, now_millis};
pub use session_store::SessionDataStore;
pub use store::PersistentSessionStore;
