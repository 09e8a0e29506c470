use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sessiondb_core::{DatabaseSettings, StoreConfig, WriteFailurePolicy};
use sessiondb_sqlite::SqliteStoreConfig;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Postgres,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sqlite: SqliteSection,

    #[serde(default)]
    pub postgres: PostgresSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqliteSection {
    /// Database file; falls back to `database.endpoint`, then the default path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub struct PostgresSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_connections: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub log_sql_queries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_sql_queries: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

pub const DEFAULT_SQLITE_PATH: &str = "~/.sessiondb/sessions.db";

impl CliConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        config.store.validate()?;
        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        // SESSIONDB_URL / SESSIONDB_USERNAME / SESSIONDB_PASSWORD
        self.database.merge_env();

        if let Ok(val) = std::env::var("SESSIONDB_BACKEND") {
            match BackendKind::from_str(&val, true) {
                Ok(kind) => self.backend = kind,
                Err(_) => eprintln!(
                    "Warning: Invalid SESSIONDB_BACKEND '{}', using {}",
                    val,
                    self.backend.as_str()
                ),
            }
        }

        if let Ok(val) = std::env::var("SESSIONDB_SQLITE_PATH") {
            self.sqlite.path = Some(val);
        }

        if let Ok(val) = std::env::var("SESSIONDB_WRITE_POLICY") {
            match val.to_lowercase().as_str() {
                "best_effort" => self.store.write_policy = WriteFailurePolicy::BestEffort,
                "strict" => self.store.write_policy = WriteFailurePolicy::Strict,
                _ => eprintln!("Warning: Invalid SESSIONDB_WRITE_POLICY '{}', ignoring", val),
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("SESSIONDB_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("SESSIONDB_LOG_SQL_QUERIES") {
            if let Ok(enabled) = val.parse::<bool>() {
                self.logging.log_sql_queries = enabled;
            }
        }
    }

    /// Database file for the SQLite backend, tilde expanded
    pub fn sqlite_path(&self) -> String {
        let raw = self
            .sqlite
            .path
            .as_deref()
            .or(self.database.endpoint.as_deref())
            .unwrap_or(DEFAULT_SQLITE_PATH);
        shellexpand::tilde(raw).to_string()
    }

    pub fn sqlite_config(&self) -> SqliteStoreConfig {
        let mut config = SqliteStoreConfig::default();
        if let Some(max) = self.sqlite.max_connections {
            config = config.with_max_connections(max);
        }
        if let Some(ms) = self.sqlite.busy_timeout_ms {
            config = config.with_busy_timeout(Duration::from_millis(ms));
        }
        if let Some(wal) = self.sqlite.wal {
            config = config.with_wal(wal);
        }
        config
    }

    #[cfg(feature = "postgres")]
    pub fn postgres_config(&self) -> sessiondb_postgres::PostgresStoreConfig {
        let mut config = sessiondb_postgres::PostgresStoreConfig::default();
        if let Some(max) = self.postgres.max_connections {
            config = config.with_max_connections(max);
        }
        if let Some(min) = self.postgres.min_connections {
            config = config.with_min_connections(min);
        }
        if let Some(ms) = self.postgres.acquire_timeout_ms {
            config = config.with_acquire_timeout(Duration::from_millis(ms));
        }
        if let Some(name) = &self.postgres.application_name {
            config = config.with_application_name(name.clone());
        }
        config
    }
}
