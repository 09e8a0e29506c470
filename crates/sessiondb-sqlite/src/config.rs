//! Configuration for the SQLite connection pool

use std::time::Duration;

/// Configuration for the SQLite connection pool
///
/// # Example
/// ```
/// use sessiondb_sqlite::SqliteStoreConfig;
/// use std::time::Duration;
///
/// let config = SqliteStoreConfig::default()
///     .with_max_connections(8)
///     .with_busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Timeout for checking a connection out of the pool
    pub acquire_timeout: Duration,

    /// How long a connection can remain idle before being closed
    pub idle_timeout: Duration,

    /// How long a statement waits on a locked database file
    pub busy_timeout: Duration,

    /// Use write-ahead logging so readers don't block the writer
    pub wal: bool,

    /// Create the database file (and its directory) when missing
    pub create_if_missing: bool,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600), // 10 minutes
            busy_timeout: Duration::from_secs(5),
            wal: true,
            create_if_missing: true,
        }
    }
}

impl SqliteStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}
