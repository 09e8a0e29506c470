//! PostgreSQL pool tuning

use std::time::Duration;

/// Pool settings for [`PostgresBackend`](crate::PostgresBackend)
///
/// The pool is built on the first store operation, not at construction, so
/// `min_connections` only takes effect once the store is in use. Connection
/// parameters (host, database, user, password) come from `DatabaseSettings`.
///
/// ```
/// use sessiondb_postgres::PostgresStoreConfig;
/// use std::time::Duration;
///
/// let config = PostgresStoreConfig::default()
///     .with_max_connections(32)
///     .with_acquire_timeout(Duration::from_secs(2));
/// assert_eq!(config.application_name, "sessiondb");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresStoreConfig {
    pub max_connections: u32,

    /// Connections kept open while idle
    pub min_connections: u32,

    /// Wait for a free pooled connection before failing the checkout
    pub acquire_timeout: Duration,

    pub idle_timeout: Duration,

    /// Connections older than this are recycled
    pub max_lifetime: Duration,

    /// Reported to the server as `application_name`, visible in `pg_stat_activity`
    pub application_name: String,
}

impl Default for PostgresStoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(10 * 60),
            max_lifetime: Duration::from_secs(30 * 60),
            application_name: "sessiondb".to_string(),
        }
    }
}

impl PostgresStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_suit_a_small_session_table() {
        let config = PostgresStoreConfig::new();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
        assert_eq!(config.application_name, "sessiondb");
    }

    #[test]
    fn test_builders_only_touch_their_field() {
        let config = PostgresStoreConfig::default()
            .with_max_connections(64)
            .with_min_connections(0)
            .with_application_name("checkout-sessions");

        assert_eq!(
            config,
            PostgresStoreConfig {
                max_connections: 64,
                min_connections: 0,
                application_name: "checkout-sessions".to_string(),
                ..PostgresStoreConfig::default()
            }
        );
    }
}
