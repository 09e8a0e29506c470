//! SessionDB CLI
//!
//! Inspect and maintain a persistent session store from the command line.
//! Every command prints its result as JSON on stdout; logs go to stderr.

mod config;

use clap::{Parser, Subcommand};
use config::{BackendKind, CliConfig};
use serde_json::{Value, json};
use sessiondb_core::{SessionData, SessionDataStore, now_millis};
use sessiondb_sqlite::{SqliteBackend, SqliteSessionStore};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "sessiondb")]
#[command(about = "SessionDB - persistent session storage", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "SESSIONDB_CONFIG")]
    config: Option<PathBuf>,

    /// Backing store, overrides the config file and SESSIONDB_BACKEND
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the session table, or repair a drifted one
    Bootstrap,
    /// Create a session, or update an existing one
    Put {
        /// Session id
        #[arg(long)]
        id: String,

        /// Attribute as key=value; values are parsed as JSON, otherwise kept as strings
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, Value)>,

        /// Inactivity timeout in seconds; 0 or less never expires
        #[arg(long)]
        max_inactive_secs: Option<i64>,

        /// Context path of the owning application
        #[arg(long)]
        context_path: Option<String>,
    },
    /// Print a stored session
    Get { id: String },
    /// Check whether a session row exists
    Exists { id: String },
    /// Delete a session
    Delete { id: String },
    /// Print which of the given ids have expired
    Expired {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

const DEFAULT_MAX_INACTIVE_SECS: i64 = 1800;

fn parse_attr(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid attribute '{}', expected key=value", s))?;
    if key.is_empty() {
        return Err(format!("invalid attribute '{}', key is empty", s));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

enum Store {
    Sqlite(SqliteSessionStore),
    #[cfg(feature = "postgres")]
    Postgres(sessiondb_postgres::PostgresSessionStore),
}

impl Store {
    fn open(config: &CliConfig) -> anyhow::Result<Self> {
        match config.backend {
            BackendKind::Sqlite => {
                let path = config.sqlite_path();
                debug!(path = %path, "Opening SQLite session store");
                Ok(Store::Sqlite(SqliteBackend::open(
                    path,
                    config.sqlite_config(),
                    config.store.clone(),
                )))
            }
            #[cfg(feature = "postgres")]
            BackendKind::Postgres => {
                config
                    .database
                    .require(true)
                    .map_err(|e| anyhow::anyhow!("PostgreSQL backend is not configured: {}", e))?;
                Ok(Store::Postgres(sessiondb_postgres::PostgresBackend::open(
                    &config.database,
                    config.postgres_config(),
                    config.store.clone(),
                )))
            }
            #[cfg(not(feature = "postgres"))]
            BackendKind::Postgres => anyhow::bail!(
                "sessiondb was built without PostgreSQL support (rebuild with --features postgres)"
            ),
        }
    }

    fn sessions(&self) -> &dyn SessionDataStore {
        match self {
            Store::Sqlite(store) => store,
            #[cfg(feature = "postgres")]
            Store::Postgres(store) => store,
        }
    }

    async fn bootstrap(&self) -> sessiondb_core::Result<()> {
        match self {
            Store::Sqlite(store) => store.bootstrap().await,
            #[cfg(feature = "postgres")]
            Store::Postgres(store) => store.bootstrap().await,
        }
    }

    async fn close(&self) {
        match self {
            Store::Sqlite(store) => store.close().await,
            #[cfg(feature = "postgres")]
            Store::Postgres(store) => store.close().await,
        }
    }
}

async fn execute(store: &Store, command: Commands) -> anyhow::Result<Value> {
    let sessions = store.sessions();

    let output = match command {
        Commands::Bootstrap => {
            store.bootstrap().await?;
            json!({ "status": "ready" })
        }
        Commands::Put {
            id,
            attrs,
            max_inactive_secs,
            context_path,
        } => {
            let now = now_millis();
            let (mut data, last_save_time) = match sessions.load(&id).await? {
                Some(mut existing) => {
                    existing.touch(now);
                    let previous = existing.last_saved_at;
                    (existing, previous)
                }
                None => {
                    let secs = max_inactive_secs.unwrap_or(DEFAULT_MAX_INACTIVE_SECS);
                    (SessionData::new(id.clone(), now, secs.saturating_mul(1000)), 0)
                }
            };

            if let Some(secs) = max_inactive_secs {
                data.max_inactive_ms = secs.saturating_mul(1000);
                data.expiry_at = data.calc_expiry(now);
            }
            if let Some(path) = context_path {
                data = data.with_context_path(path);
            }
            for (key, value) in attrs {
                data.set_attribute(key, &value)?;
            }
            data.last_saved_at = now;

            sessions.store(&id, &data, last_save_time).await?;
            serde_json::to_value(&data)?
        }
        Commands::Get { id } => match sessions.load(&id).await? {
            Some(data) => serde_json::to_value(&data)?,
            None => Value::Null,
        },
        Commands::Exists { id } => {
            let exists = sessions.exists(&id).await?;
            json!({ "id": id, "exists": exists })
        }
        Commands::Delete { id } => {
            let deleted = sessions.delete(&id).await?;
            json!({ "id": id, "deleted": deleted })
        }
        Commands::Expired { ids } => {
            let candidates: HashSet<String> = ids.into_iter().collect();
            let mut expired: Vec<String> =
                sessions.get_expired(&candidates).await.into_iter().collect();
            expired.sort();
            json!(expired)
        }
    };

    Ok(output)
}

fn init_tracing(config: &CliConfig) -> anyhow::Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let mut filter = EnvFilter::new(format!("{}", log_level));

    // sqlx logs every statement at INFO; keep it quiet unless asked for
    if !config.logging.log_sql_queries {
        match "sqlx=warn".parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => tracing::warn!("Failed to set sqlx log filter: {}", e),
        }
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(path) = &cli.config {
        CliConfig::from_file(path)?
    } else {
        CliConfig::default()
    };

    // Environment overrides the file, flags override both
    config.merge_env();
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config)?;
    info!(backend = config.backend.as_str(), "Starting sessiondb");

    let store = Store::open(&config)?;
    let result = execute(&store, cli.command).await;
    store.close().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
