//! Database layer for the local mirror store.
//!
//! Handles pool creation and schema migrations. Entity-specific queries live in
//! `crate::models`.

pub mod pool;

pub use pool::DbPool;

use std::path::Path;
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<DbError> for crate::error::SyncError {
    fn from(err: DbError) -> Self {
        crate::error::SyncError::database(err.to_string())
    }
}

/// Initialize the database: create the file if needed and run migrations.
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::Migration(format!("Failed to create database directory: {}", e))
            })?;
        }
    }

    let pool = pool::create_pool(db_path).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run all pending database migrations.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let applied: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM _migrations WHERE name = '0001_initial_schema'")
            .fetch_optional(&mut *conn)
            .await?;

    if applied.is_none() {
        let migration_sql = include_str!("migrations/0001_initial_schema.sql");

        for statement in parse_sql_statements(migration_sql) {
            sqlx::query(&statement).execute(&mut *conn).await?;
        }

        sqlx::query("INSERT INTO _migrations (name) VALUES ('0001_initial_schema')")
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Split a migration file into individual SQL statements.
///
/// Handles comment lines, inline comments, and semicolons inside parentheses
/// (e.g. `strftime('%s', 'now')` in column defaults).
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current_statement = String::new();
    let mut paren_depth: i32 = 0;

    for line in sql.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("--") {
            continue;
        }

        let line_without_comment = if let Some(idx) = line.find("--") {
            &line[..idx]
        } else {
            line
        };

        for ch in line_without_comment.chars() {
            match ch {
                '(' => {
                    paren_depth += 1;
                    current_statement.push(ch);
                }
                ')' => {
                    paren_depth = paren_depth.saturating_sub(1);
                    current_statement.push(ch);
                }
                ';' if paren_depth == 0 => {
                    let stmt = current_statement.trim().to_string();
                    if !stmt.is_empty() {
                        statements.push(stmt);
                    }
                    current_statement.clear();
                }
                _ => {
                    current_statement.push(ch);
                }
            }
        }

        if !current_statement.is_empty() {
            current_statement.push(' ');
        }
    }

    let final_stmt = current_statement.trim().to_string();
    if !final_stmt.is_empty() {
        statements.push(final_stmt);
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = initialize(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_migrations' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(table_names.contains(&"accounts"));
        assert!(table_names.contains(&"monitored_projects"));
        assert!(table_names.contains(&"merge_requests"));
        assert!(table_names.contains(&"issues"));
        assert!(table_names.contains(&"issue_merge_requests"));
        assert!(table_names.contains(&"board_lists"));
        assert!(table_names.contains(&"sync_runs"));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let _pool1 = initialize(&db_path).await.unwrap();
        let pool2 = initialize(&db_path).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&pool2)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[test]
    fn test_parse_sql_statements_handles_inner_semicolons() {
        let sql = "CREATE TABLE t (\n  ts INTEGER DEFAULT (strftime('%s', 'now'))\n);\n-- comment\nCREATE INDEX i ON t(ts);";
        let statements = parse_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE t"));
        assert!(statements[1].starts_with("CREATE INDEX i"));
    }
}
