//! `session_data` schema for SQLite
//!
//! SQLite cannot change a column's type in place, so a table whose declared types
//! or NOT NULL flags drifted from the expected layout is rebuilt: a new table is
//! created, rows are copied across with casts, the old table is dropped and the
//! new one renamed. The same happens when `id` is no longer the primary key, since
//! upserts rely on it. Rows that cannot satisfy the NOT NULL constraints are dropped
//! and duplicate ids collapse to one row.

use sessiondb_core::{Error, Result};
use sqlx::{Connection, Row, SqliteConnection};
use tracing::{debug, info, warn};

pub const TABLE: &str = "session_data";

/// Expected columns and declared types; every column is NOT NULL, `id` is the primary key
const COLUMNS: [(&str, &str); 3] = [("id", "TEXT"), ("data", "BLOB"), ("expiry_time", "INTEGER")];

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_session_data_expiry_time ON session_data(expiry_time)";

fn create_table_sql(name: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY NOT NULL,
            data BLOB NOT NULL,
            expiry_time INTEGER NOT NULL
        )
        "#,
        name
    )
}

/// A column as reported by `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

pub async fn table_columns(conn: &mut SqliteConnection) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query("PRAGMA table_info(session_data)")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::Schema(format!("Failed to inspect session_data: {}", e)))?;

    rows.iter()
        .map(|row| {
            Ok(ColumnInfo {
                name: row
                    .try_get("name")
                    .map_err(|e| Error::Schema(format!("Unexpected table_info row: {}", e)))?,
                declared_type: row
                    .try_get("type")
                    .map_err(|e| Error::Schema(format!("Unexpected table_info row: {}", e)))?,
                not_null: row
                    .try_get::<i64, _>("notnull")
                    .map_err(|e| Error::Schema(format!("Unexpected table_info row: {}", e)))?
                    != 0,
                primary_key: row
                    .try_get::<i64, _>("pk")
                    .map_err(|e| Error::Schema(format!("Unexpected table_info row: {}", e)))?
                    != 0,
            })
        })
        .collect()
}

/// Whether the existing columns match the expected layout
fn matches_layout(columns: &[ColumnInfo]) -> bool {
    columns.len() == COLUMNS.len()
        && COLUMNS.iter().all(|(name, ty)| {
            columns.iter().any(|c| {
                c.name == *name
                    && c.declared_type.eq_ignore_ascii_case(ty)
                    && c.not_null
                    && c.primary_key == (*name == "id")
            })
        })
}

/// Create the table and index, repairing a drifted table
///
/// Returns `true` when an existing table had to be rebuilt.
pub async fn bootstrap(conn: &mut SqliteConnection) -> Result<bool> {
    let columns = table_columns(conn).await?;

    if columns.is_empty() {
        sqlx::query(&create_table_sql(TABLE))
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::Schema(format!("Failed to create session_data: {}", e)))?;
        ensure_index(conn).await?;
        info!("Created session_data table");
        return Ok(false);
    }

    if matches_layout(&columns) {
        ensure_index(conn).await?;
        debug!("session_data table already up to date");
        return Ok(false);
    }

    warn!(columns = ?columns, "session_data layout drifted, rebuilding table");
    rebuild(conn, &columns).await?;
    Ok(true)
}

async fn ensure_index(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(CREATE_INDEX)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::Schema(format!("Failed to create expiry index: {}", e)))?;
    Ok(())
}

async fn rebuild(conn: &mut SqliteConnection, existing: &[ColumnInfo]) -> Result<()> {
    let scratch = format!("{}_rebuild", TABLE);

    // Missing columns copy as NULL and the row is filtered out below
    let projections: Vec<String> = COLUMNS
        .iter()
        .map(|(name, ty)| {
            if existing.iter().any(|c| c.name == *name) {
                format!("CAST({} AS {})", name, ty)
            } else {
                "NULL".to_string()
            }
        })
        .collect();
    let copy = format!(
        "INSERT OR REPLACE INTO {scratch} (id, data, expiry_time) \
         SELECT * FROM (SELECT {} AS id, {} AS data, {} AS expiry_time FROM {TABLE}) \
         WHERE id IS NOT NULL AND data IS NOT NULL AND expiry_time IS NOT NULL",
        projections[0], projections[1], projections[2],
    );

    let mut tx = conn
        .begin()
        .await
        .map_err(|e| Error::Schema(format!("Failed to begin schema rebuild: {}", e)))?;

    let before: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", TABLE))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Schema(format!("Failed to count session_data rows: {}", e)))?;

    let statements = [
        format!("DROP TABLE IF EXISTS {}", scratch),
        create_table_sql(&scratch),
        copy,
        format!("DROP TABLE {}", TABLE),
        format!("ALTER TABLE {} RENAME TO {}", scratch, TABLE),
        CREATE_INDEX.to_string(),
    ];
    for statement in &statements {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Schema(format!("Schema rebuild failed: {}", e)))?;
    }

    let after: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", TABLE))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Schema(format!("Failed to count session_data rows: {}", e)))?;

    tx.commit()
        .await
        .map_err(|e| Error::Schema(format!("Failed to commit schema rebuild: {}", e)))?;

    if after < before {
        warn!(
            dropped = before - after,
            "Rows without id, data or expiry, or with duplicate ids, were dropped during rebuild"
        );
    }
    info!(rows = after, "Rebuilt session_data table");
    Ok(())
}
