//! Database migration system for the PostgreSQL session store
//!
//! Provides versioned schema migrations with tracking to ensure migrations
//! are applied exactly once and in the correct order. After the migrations, the
//! `session_data` columns are checked against the expected types and repaired in
//! place when an older or hand-made table drifted. Upserts rely on `id` being the
//! primary key, so a table without a unique `id` gets its duplicates removed and the
//! key added back.
//!
//! The whole run happens in one transaction holding an advisory lock, so nodes
//! bootstrapping at the same time apply each step once.

use sessiondb_core::{Error, Result};
use sqlx::{Connection, PgConnection, Postgres, Transaction};
use tracing::{debug, info, warn};

/// Advisory lock key serializing concurrent bootstraps
const BOOTSTRAP_LOCK_KEY: i64 = 0x5353_4442_0001;

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Unique version number (must be sequential)
    pub version: i32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to execute for this migration (a single statement)
    pub up_sql: &'static str,
}

/// All migrations in order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Create session_data table",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS session_data (
                id TEXT PRIMARY KEY NOT NULL,
                data BYTEA NOT NULL,
                expiry_time BIGINT NOT NULL
            )
        "#,
    },
    Migration {
        version: 2,
        description: "Create session_data expiry index",
        up_sql: r#"
            CREATE INDEX IF NOT EXISTS idx_session_data_expiry_time
            ON session_data(expiry_time)
        "#,
    },
];

/// Expected `session_data` columns as reported by `information_schema`
pub const EXPECTED_COLUMNS: &[(&str, &str)] = &[
    ("id", "text"),
    ("data", "bytea"),
    ("expiry_time", "bigint"),
];

/// A column as reported by `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
}

impl ColumnInfo {
    pub fn nullable(&self) -> bool {
        self.is_nullable.eq_ignore_ascii_case("YES")
    }
}

/// Key constraints currently on `session_data`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyInfo {
    /// A unique, non-partial index covers exactly `id`
    pub id_unique: bool,
    /// Name of the primary key constraint, whatever its columns
    pub primary_key: Option<String>,
}

/// Changes needed to bring one column back to the expected layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRepair {
    /// Column is absent; rows cannot be recovered
    Missing { column: &'static str },
    /// `ALTER COLUMN ... TYPE ... USING ...`
    ChangeType {
        column: &'static str,
        to: &'static str,
        using: String,
    },
    /// Drop rows holding NULL, then `SET NOT NULL`
    SetNotNull { column: &'static str },
    /// Keep one row per id and make `id` the primary key, dropping `replaces` first
    PrimaryKey { replaces: Option<String> },
}

impl ColumnRepair {
    fn statements(&self) -> Vec<String> {
        match self {
            ColumnRepair::Missing { column } => vec![format!(
                "ALTER TABLE session_data ADD COLUMN {} {}",
                column,
                expected_type(column)
            )],
            ColumnRepair::ChangeType { column, to, using } => vec![format!(
                "ALTER TABLE session_data ALTER COLUMN {} TYPE {} USING {}",
                column, to, using
            )],
            ColumnRepair::SetNotNull { column } => vec![
                format!("DELETE FROM session_data WHERE {} IS NULL", column),
                format!("ALTER TABLE session_data ALTER COLUMN {} SET NOT NULL", column),
            ],
            ColumnRepair::PrimaryKey { replaces } => {
                let mut statements = Vec::new();
                if let Some(name) = replaces {
                    statements.push(format!(
                        "ALTER TABLE session_data DROP CONSTRAINT {}",
                        quote_ident(name)
                    ));
                }
                statements.push(
                    "DELETE FROM session_data a USING session_data b \
                     WHERE a.id = b.id AND a.ctid < b.ctid"
                        .to_string(),
                );
                statements.push("ALTER TABLE session_data ADD PRIMARY KEY (id)".to_string());
                statements
            }
        }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn expected_type(column: &str) -> &'static str {
    EXPECTED_COLUMNS
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, ty)| *ty)
        .unwrap_or("text")
}

/// Cast expression converting `column` from `from` to `to`
fn cast_expression(column: &str, from: &str, to: &str) -> String {
    let from_character = matches!(from, "text" | "character varying" | "character");
    if to == "bytea" && from_character {
        format!("convert_to({}, 'UTF8')", column)
    } else {
        format!("{}::{}", column, to)
    }
}

/// Compare existing columns and keys with the expected layout
///
/// Missing columns are added as nullable and then tightened, which removes every
/// row (they have no value for it). The key repair always comes last so it sees
/// the final `id` column.
pub fn plan_repairs(existing: &[ColumnInfo], keys: &KeyInfo) -> Vec<ColumnRepair> {
    let mut repairs = Vec::new();

    for &(name, ty) in EXPECTED_COLUMNS {
        match existing.iter().find(|c| c.column_name == name) {
            None => {
                repairs.push(ColumnRepair::Missing { column: name });
                repairs.push(ColumnRepair::SetNotNull { column: name });
            }
            Some(column) => {
                if !column.data_type.eq_ignore_ascii_case(ty) {
                    repairs.push(ColumnRepair::ChangeType {
                        column: name,
                        to: ty,
                        using: cast_expression(name, &column.data_type.to_lowercase(), ty),
                    });
                }
                if column.nullable() {
                    repairs.push(ColumnRepair::SetNotNull { column: name });
                }
            }
        }
    }

    if !keys.id_unique {
        repairs.push(ColumnRepair::PrimaryKey {
            replaces: keys.primary_key.clone(),
        });
    }

    repairs
}

/// Run all pending migrations and repair column drift
///
/// Creates a `schema_migrations` table to track which migrations have been applied,
/// then runs any migrations that haven't been applied yet.
///
/// Returns the number of column repairs applied.
pub async fn run_migrations(conn: &mut PgConnection) -> Result<usize> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| Error::Schema(format!("Failed to begin bootstrap transaction: {}", e)))?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Schema(format!("Failed to take bootstrap lock: {}", e)))?;

    // Create schema_migrations table if it doesn't exist
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .map_err(|e| Error::Schema(format!("Failed to create schema_migrations table: {}", e)))?;

    // Get list of applied migrations
    let applied_versions: Vec<i32> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| Error::Schema(format!("Failed to fetch applied migrations: {}", e)))?;

    debug!(
        "Found {} applied migrations: {:?}",
        applied_versions.len(),
        applied_versions
    );

    for migration in MIGRATIONS {
        if applied_versions.contains(&migration.version) {
            debug!(
                "Skipping migration {}: {} (already applied)",
                migration.version, migration.description
            );
            continue;
        }

        info!(
            "Applying migration {}: {}",
            migration.version, migration.description
        );

        sqlx::query(migration.up_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Schema(format!(
                    "Failed to apply migration {}: {}",
                    migration.version, e
                ))
            })?;

        sqlx::query(
            "INSERT INTO schema_migrations (version, description) VALUES ($1, $2)
                ON CONFLICT (version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(migration.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Schema(format!(
                "Failed to record migration {}: {}",
                migration.version, e
            ))
        })?;
    }

    let repaired = repair_columns(&mut tx).await?;

    tx.commit()
        .await
        .map_err(|e| Error::Schema(format!("Failed to commit bootstrap: {}", e)))?;

    Ok(repaired)
}

async fn repair_columns(tx: &mut Transaction<'_, Postgres>) -> Result<usize> {
    let columns = table_columns(&mut **tx).await?;
    let keys = table_keys(&mut **tx).await?;
    let repairs = plan_repairs(&columns, &keys);

    if repairs.is_empty() {
        debug!("session_data columns match the expected layout");
        return Ok(0);
    }

    warn!(repairs = ?repairs, "session_data columns drifted, repairing");
    for repair in &repairs {
        for statement in repair.statements() {
            let result = sqlx::query(&statement)
                .execute(&mut **tx)
                .await
                .map_err(|e| Error::Schema(format!("Failed to run '{}': {}", statement, e)))?;
            if result.rows_affected() > 0 {
                warn!(
                    rows = result.rows_affected(),
                    "Removed rows that cannot satisfy the session_data layout"
                );
            }
        }
    }

    Ok(repairs.len())
}

/// Current `session_data` columns
pub async fn table_columns(conn: &mut PgConnection) -> Result<Vec<ColumnInfo>> {
    sqlx::query_as(
        r#"
        SELECT column_name::text AS column_name,
               data_type::text AS data_type,
               is_nullable::text AS is_nullable
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = 'session_data'
        ORDER BY ordinal_position
        "#,
    )
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| Error::Schema(format!("Failed to inspect session_data columns: {}", e)))
}

/// Current key constraints on `session_data`
pub async fn table_keys(conn: &mut PgConnection) -> Result<KeyInfo> {
    let id_unique: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = to_regclass('session_data')
              AND i.indisunique
              AND i.indpred IS NULL
              AND i.indnkeyatts = 1
              AND a.attname = 'id'
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| Error::Schema(format!("Failed to inspect session_data indexes: {}", e)))?;

    let primary_key: Option<String> = sqlx::query_scalar(
        r#"
        SELECT conname::text FROM pg_constraint
        WHERE conrelid = to_regclass('session_data') AND contype = 'p'
        "#,
    )
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| Error::Schema(format!("Failed to inspect session_data constraints: {}", e)))?;

    Ok(KeyInfo {
        id_unique,
        primary_key,
    })
}

/// Get the current schema version
pub async fn get_current_version(conn: &mut PgConnection) -> Result<Option<i32>> {
    // Check if schema_migrations table exists
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = 'schema_migrations'
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        Error::Schema(format!(
            "Failed to check for schema_migrations table: {}",
            e
        ))
    })?;

    if !table_exists {
        return Ok(None);
    }

    // Get the highest applied version
    let version: Option<i32> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| Error::Schema(format!("Failed to get current schema version: {}", e)))?;

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, ty: &str, nullable: bool) -> ColumnInfo {
        ColumnInfo {
            column_name: name.to_string(),
            data_type: ty.to_string(),
            is_nullable: if nullable { "YES" } else { "NO" }.to_string(),
        }
    }

    fn keyed() -> KeyInfo {
        KeyInfo {
            id_unique: true,
            primary_key: Some("session_data_pkey".to_string()),
        }
    }

    #[test]
    fn test_migrations_are_sequential() {
        let mut expected_version = 1;
        for migration in MIGRATIONS {
            assert_eq!(
                migration.version, expected_version,
                "Migration versions must be sequential"
            );
            expected_version += 1;
        }
    }

    #[test]
    fn test_migrations_have_descriptions() {
        for migration in MIGRATIONS {
            assert!(
                !migration.description.is_empty(),
                "Migration {} must have a description",
                migration.version
            );
        }
    }

    #[test]
    fn test_migrations_are_single_statements() {
        for migration in MIGRATIONS {
            assert!(
                !migration.up_sql.trim().trim_end_matches(';').contains(';'),
                "Migration {} must hold one statement",
                migration.version
            );
        }
    }

    #[test]
    fn test_no_repairs_for_expected_layout() {
        let columns = vec![
            column("id", "text", false),
            column("data", "bytea", false),
            column("expiry_time", "bigint", false),
        ];
        assert!(plan_repairs(&columns, &keyed()).is_empty());
    }

    #[test]
    fn test_type_drift_is_cast() {
        let columns = vec![
            column("id", "character varying", false),
            column("data", "text", false),
            column("expiry_time", "integer", true),
        ];
        let repairs = plan_repairs(&columns, &keyed());

        assert_eq!(
            repairs,
            vec![
                ColumnRepair::ChangeType {
                    column: "id",
                    to: "text",
                    using: "id::text".to_string(),
                },
                ColumnRepair::ChangeType {
                    column: "data",
                    to: "bytea",
                    using: "convert_to(data, 'UTF8')".to_string(),
                },
                ColumnRepair::ChangeType {
                    column: "expiry_time",
                    to: "bigint",
                    using: "expiry_time::bigint".to_string(),
                },
                ColumnRepair::SetNotNull {
                    column: "expiry_time"
                },
            ]
        );
    }

    #[test]
    fn test_missing_column_is_added_then_tightened() {
        let columns = vec![column("id", "text", false), column("data", "bytea", false)];
        let repairs = plan_repairs(&columns, &keyed());
        assert_eq!(
            repairs,
            vec![
                ColumnRepair::Missing {
                    column: "expiry_time"
                },
                ColumnRepair::SetNotNull {
                    column: "expiry_time"
                },
            ]
        );
        assert_eq!(
            repairs[0].statements(),
            vec!["ALTER TABLE session_data ADD COLUMN expiry_time bigint".to_string()]
        );
    }

    #[test]
    fn test_set_not_null_removes_null_rows_first() {
        let statements = ColumnRepair::SetNotNull { column: "data" }.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("DELETE FROM session_data"));
        assert!(statements[1].ends_with("SET NOT NULL"));
    }

    #[test]
    fn test_missing_key_is_restored_last() {
        let columns = vec![
            column("id", "text", true),
            column("data", "bytea", false),
            column("expiry_time", "bigint", false),
        ];
        let repairs = plan_repairs(&columns, &KeyInfo::default());
        assert_eq!(
            repairs,
            vec![
                ColumnRepair::SetNotNull { column: "id" },
                ColumnRepair::PrimaryKey { replaces: None },
            ]
        );

        let statements = repairs[1].statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("DELETE FROM session_data a USING session_data b"));
        assert_eq!(statements[1], "ALTER TABLE session_data ADD PRIMARY KEY (id)");
    }

    #[test]
    fn test_primary_key_on_other_column_is_replaced() {
        let columns = vec![
            column("id", "text", false),
            column("data", "bytea", false),
            column("expiry_time", "bigint", false),
        ];
        let keys = KeyInfo {
            id_unique: false,
            primary_key: Some("legacy \"pk\"".to_string()),
        };
        let repairs = plan_repairs(&columns, &keys);
        assert_eq!(
            repairs,
            vec![ColumnRepair::PrimaryKey {
                replaces: Some("legacy \"pk\"".to_string())
            }]
        );
        assert_eq!(
            repairs[0].statements()[0],
            "ALTER TABLE session_data DROP CONSTRAINT \"legacy \"\"pk\"\"\""
        );
    }
}
