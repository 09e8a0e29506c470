//! SqliteBackend - session statements over a SQLite file

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sessiondb_core::{
    ConnectionTarget, DatabaseSettings, Error, PersistentSessionStore, PoolProvider, Result,
    SessionQueries, SessionRecord, StoreConfig,
};

use crate::config::SqliteStoreConfig;
use crate::schema;

/// Session store persisting to SQLite
pub type SqliteSessionStore = PersistentSessionStore<SqliteBackend>;

/// SQLite backend
///
/// The endpoint is either a `sqlite:` URL or a filesystem path (`~` is expanded).
/// SQLite has no authentication, so principal and credential are optional.
#[derive(Debug, Clone, Default)]
pub struct SqliteBackend {
    config: SqliteStoreConfig,
}

impl SqliteBackend {
    pub fn new(config: SqliteStoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Build a store for the database file at `path`
    pub fn open(
        path: impl AsRef<Path>,
        config: SqliteStoreConfig,
        store_config: StoreConfig,
    ) -> SqliteSessionStore {
        let settings = DatabaseSettings {
            endpoint: Some(path.as_ref().to_string_lossy().into_owned()),
            principal: None,
            credential: None,
        };
        PersistentSessionStore::new(Self::new(config), &settings, store_config)
    }

    fn connect_options(&self, endpoint: &str) -> Result<SqliteConnectOptions> {
        let options = if endpoint.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(endpoint).map_err(|e| {
                Error::Config(format!("Invalid SQLite URL '{}': {}", endpoint, e))
            })?
        } else {
            SqliteConnectOptions::new().filename(expand_tilde(endpoint))
        };

        let journal_mode = if self.config.wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        Ok(options
            .create_if_missing(self.config.create_if_missing)
            .journal_mode(journal_mode)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.config.busy_timeout))
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[async_trait]
impl PoolProvider for SqliteBackend {
    type Pool = SqlitePool;
    type Connection = PoolConnection<Sqlite>;

    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn requires_credentials(&self) -> bool {
        false
    }

    async fn connect(&self, target: &ConnectionTarget) -> Result<SqlitePool> {
        let options = self.connect_options(&target.endpoint)?;

        // Create directory if needed
        if self.config.create_if_missing {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .min_connections(self.config.min_connections)
            .acquire_timeout(self.config.acquire_timeout)
            .idle_timeout(Some(self.config.idle_timeout))
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::ConnectionAcquisition(format!(
                    "Failed to open SQLite database {}: {}",
                    target.endpoint, e
                ))
            })
    }

    async fn acquire(&self, pool: &SqlitePool) -> Result<PoolConnection<Sqlite>> {
        pool.acquire()
            .await
            .map_err(|e| Error::ConnectionAcquisition(format!("Failed to acquire connection: {}", e)))
    }

    async fn close(&self, pool: &SqlitePool) {
        pool.close().await;
    }
}

#[async_trait]
impl SessionQueries for SqliteBackend {
    async fn bootstrap(&self, conn: &mut PoolConnection<Sqlite>) -> Result<()> {
        schema::bootstrap(&mut **conn).await?;
        Ok(())
    }

    async fn upsert(&self, conn: &mut PoolConnection<Sqlite>, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_data (id, data, expiry_time)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                expiry_time = excluded.expiry_time
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
        conn: &mut PoolConnection<Sqlite>,
        id: &str,
    ) -> Result<Option<SessionRecord>> {
        let row: Option<(String, Vec<u8>, i64)> =
            sqlx::query_as("SELECT id, data, expiry_time FROM session_data WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut **conn)
                .await
                .map_err(|e| Error::Database(format!("Failed to load session {}: {}", id, e)))?;

        Ok(row.map(|(id, payload, expiry_at)| SessionRecord::new(id, payload, expiry_at)))
    }

    async fn contains(&self, conn: &mut PoolConnection<Sqlite>, id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM session_data WHERE id = ? LIMIT 1")
                .bind(id)
                .fetch_optional(&mut **conn)
                .await
                .map_err(|e| Error::Database(format!("Failed to check session {}: {}", id, e)))?;

        Ok(found.is_some())
    }

    async fn find_expired_among(
        &self,
        conn: &mut PoolConnection<Sqlite>,
        candidates: &[String],
        now: i64,
    ) -> Result<HashSet<String>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT id FROM session_data WHERE expiry_time <= ");
        builder.push_bind(now);
        builder.push(" AND id IN (");
        let mut ids = builder.separated(", ");
        for candidate in candidates {
            ids.push_bind(candidate.as_str());
        }
        ids.push_unseparated(")");

        let expired: Vec<String> = builder
            .build_query_scalar()
            .fetch_all(&mut **conn)
            .await
            .map_err(|e| Error::Database(format!("Failed to scan expired sessions: {}", e)))?;

        Ok(expired.into_iter().collect())
    }

    async fn delete_by_id(&self, conn: &mut PoolConnection<Sqlite>, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_data WHERE id = ?")
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
    use tempfile::TempDir;

    fn target(endpoint: &str) -> ConnectionTarget {
        ConnectionTarget {
            endpoint: endpoint.to_string(),
            principal: String::new(),
            credential: String::new(),
        }
    }

    #[test]
    fn test_requires_no_credentials() {
        let backend = SqliteBackend::default();
        assert!(!backend.requires_credentials());
        assert_eq!(backend.name(), "sqlite");
    }

    #[test]
    fn test_path_endpoint_is_expanded() {
        let backend = SqliteBackend::default();
        let options = backend.connect_options("~/sessions.db").unwrap();
        assert!(!options.get_filename().starts_with("~"));
        assert!(options.get_filename().ends_with("sessions.db"));
    }

    #[test]
    fn test_url_endpoint() {
        let backend = SqliteBackend::default();
        let options = backend.connect_options("sqlite://data/sessions.db").unwrap();
        assert!(options.get_filename().ends_with("sessions.db"));
    }

    #[tokio::test]
    async fn test_connect_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("sessions.db");

        let backend = SqliteBackend::default();
        let pool = backend
            .connect(&target(&db_path.to_string_lossy()))
            .await
            .unwrap();
        assert!(db_path.exists());
        backend.close(&pool).await;
    }

    #[tokio::test]
    async fn test_missing_file_without_create_fails() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("absent.db");

        let backend = SqliteBackend::new(SqliteStoreConfig::default().with_create_if_missing(false));
        let result = backend.connect(&target(&db_path.to_string_lossy())).await;
        assert!(matches!(result, Err(Error::ConnectionAcquisition(_))));
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_checkout() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("sessions.db");

        let backend = SqliteBackend::default();
        let pool = backend
            .connect(&target(&db_path.to_string_lossy()))
            .await
            .unwrap();
        backend.close(&pool).await;

        assert!(matches!(
            backend.acquire(&pool).await,
            Err(Error::ConnectionAcquisition(_))
        ));
    }
}
