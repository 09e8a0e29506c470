//! PostgresBackend - session statements over PostgreSQL

use async_trait::async_trait;
use sqlx::Postgres;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::collections::HashSet;
use std::str::FromStr;

use crate::config::PostgresStoreConfig;
use crate::migrations;
use sessiondb_core::{
    ConnectionTarget, DatabaseSettings, Error, PersistentSessionStore, PoolProvider, Result,
    SessionQueries, SessionRecord, StoreConfig,
};

/// Session store persisting to PostgreSQL
pub type PostgresSessionStore = PersistentSessionStore<PostgresBackend>;

/// PostgreSQL backend
///
/// The endpoint is a `postgres://` URL; principal and credential from the
/// settings override any user or password embedded in it.
#[derive(Debug, Clone, Default)]
pub struct PostgresBackend {
    config: PostgresStoreConfig,
}

impl PostgresBackend {
    pub fn new(config: PostgresStoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostgresStoreConfig {
        &self.config
    }

    /// Build a store for the given settings
    ///
    /// # Example
    /// ```no_run
    /// # use sessiondb_postgres::{PostgresBackend, PostgresStoreConfig};
    /// # use sessiondb_core::{DatabaseSettings, StoreConfig};
    /// # async fn example() -> sessiondb_core::Result<()> {
    /// let store = PostgresBackend::open(
    ///     &DatabaseSettings::new("postgres://localhost/app", "app", "secret"),
    ///     PostgresStoreConfig::default().with_max_connections(32),
    ///     StoreConfig::default(),
    /// );
    /// store.bootstrap().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(
        settings: &DatabaseSettings,
        config: PostgresStoreConfig,
        store_config: StoreConfig,
    ) -> PostgresSessionStore {
        PersistentSessionStore::new(Self::new(config), settings, store_config)
    }

    fn connect_options(&self, target: &ConnectionTarget) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&target.endpoint).map_err(|e| {
            Error::Config(format!("Invalid PostgreSQL URL '{}': {}", target.endpoint, e))
        })?;

        Ok(options
            .username(&target.principal)
            .password(&target.credential)
            .application_name(&self.config.application_name))
    }
}

#[async_trait]
impl PoolProvider for PostgresBackend {
    type Pool = PgPool;
    type Connection = PoolConnection<Postgres>;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, target: &ConnectionTarget) -> Result<PgPool> {
        let options = self.connect_options(target)?;

        PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(self.config.acquire_timeout)
            .idle_timeout(Some(self.config.idle_timeout))
            .max_lifetime(Some(self.config.max_lifetime))
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::ConnectionAcquisition(format!("Failed to connect to PostgreSQL: {}", e))
            })
    }

    async fn acquire(&self, pool: &PgPool) -> Result<PoolConnection<Postgres>> {
        pool.acquire()
            .await
            .map_err(|e| Error::ConnectionAcquisition(format!("Failed to acquire connection: {}", e)))
    }

    async fn close(&self, pool: &PgPool) {
        pool.close().await;
    }
}

#[async_trait]
impl SessionQueries for PostgresBackend {
    async fn bootstrap(&self, conn: &mut PoolConnection<Postgres>) -> Result<()> {
        migrations::run_migrations(&mut **conn).await?;
        Ok(())
    }

    async fn upsert(
        &self,
        conn: &mut PoolConnection<Postgres>,
        record: &SessionRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_data (id, data, expiry_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                data = EXCLUDED.data,
                expiry_time = EXCLUDED.expiry_time
            "#,
        )
        .bind(&record.id)
        .bind(&record.payload)
        .bind(record.expiry_at)
        .execute(&mut **conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert session {}: {}", record.id, e)))?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        conn: &mut PoolConnection<Postgres>,
        id: &str,
    ) -> Result<Option<SessionRecord>> {
        let row: Option<(String, Vec<u8>, i64)> =
            sqlx::query_as("SELECT id, data, expiry_time FROM session_data WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut **conn)
                .await
                .map_err(|e| Error::Database(format!("Failed to load session {}: {}", id, e)))?;

        Ok(row.map(|(id, payload, expiry_at)| SessionRecord::new(id, payload, expiry_at)))
    }

    async fn contains(&self, conn: &mut PoolConnection<Postgres>, id: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM session_data WHERE id = $1)")
            .bind(id)
            .fetch_one(&mut **conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to check session {}: {}", id, e)))
    }

    async fn find_expired_among(
        &self,
        conn: &mut PoolConnection<Postgres>,
        candidates: &[String],
        now: i64,
    ) -> Result<HashSet<String>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let expired: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM session_data WHERE id = ANY($1) AND expiry_time <= $2",
        )
        .bind(candidates)
        .bind(now)
        .fetch_all(&mut **conn)
        .await
        .map_err(|e| Error::Database(format!("Failed to scan expired sessions: {}", e)))?;

        Ok(expired.into_iter().collect())
    }

    async fn delete_by_id(&self, conn: &mut PoolConnection<Postgres>, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_data WHERE id = $1")
            .bind(id)
            .execute(&mut **conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete session {}: {}", id, e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(endpoint: &str) -> ConnectionTarget {
        ConnectionTarget {
            endpoint: endpoint.to_string(),
            principal: "app".to_string(),
            credential: "secret".to_string(),
        }
    }

    #[test]
    fn test_requires_credentials() {
        let backend = PostgresBackend::default();
        assert!(backend.requires_credentials());
        assert_eq!(backend.name(), "postgres");
    }

    #[test]
    fn test_settings_override_url_user() {
        let backend = PostgresBackend::default();
        let options = backend
            .connect_options(&target("postgres://other@db.internal:6543/sessions"))
            .unwrap();

        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("sessions"));
        assert_eq!(options.get_application_name(), Some("sessiondb"));
    }

    #[test]
    fn test_invalid_url() {
        let backend = PostgresBackend::default();
        let result = backend.connect_options(&target("not a url"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unconfigured_store_without_credentials() {
        let store = PostgresBackend::open(
            &DatabaseSettings {
                endpoint: Some("postgres://localhost/sessions".to_string()),
                principal: None,
                credential: None,
            },
            PostgresStoreConfig::default(),
            StoreConfig::default(),
        );
        assert!(!store.is_configured());
    }
}
