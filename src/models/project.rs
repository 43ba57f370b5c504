//! Monitored project model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A GitLab project selected for mirroring.
///
/// `last_sync_at` is the incremental cursor: remote fetches for this project
/// use `updated_after = last_sync_at`, and the field only advances once all of
/// the project's categories have been processed in a pass.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitoredProject {
    pub id: i64,
    pub account_id: i64,
    pub gitlab_project_id: i64,
    pub name: String,
    pub name_with_namespace: String,
    pub web_url: String,
    pub sync_enabled: bool,
    pub last_sync_at: Option<i64>,
    pub created_at: i64,
}

/// Register a project for mirroring. Returns the new local id.
pub async fn insert_project(
    pool: &sqlx::SqlitePool,
    account_id: i64,
    gitlab_project_id: i64,
    name: &str,
    name_with_namespace: &str,
    web_url: &str,
    sync_enabled: bool,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO monitored_projects
             (account_id, gitlab_project_id, name, name_with_namespace, web_url, sync_enabled)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(account_id)
    .bind(gitlab_project_id)
    .bind(name)
    .bind(name_with_namespace)
    .bind(web_url)
    .bind(sync_enabled)
    .fetch_one(pool)
    .await
}

/// Look up a project by local id.
pub async fn get_project(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Option<MonitoredProject>, sqlx::Error> {
    sqlx::query_as::<_, MonitoredProject>(
        "SELECT id, account_id, gitlab_project_id, name, name_with_namespace, web_url,
                sync_enabled, last_sync_at, created_at
         FROM monitored_projects WHERE id = ?",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
}

/// All sync-enabled projects for an account, in insertion order.
pub async fn list_sync_enabled(
    pool: &sqlx::SqlitePool,
    account_id: i64,
) -> Result<Vec<MonitoredProject>, sqlx::Error> {
    sqlx::query_as::<_, MonitoredProject>(
        "SELECT id, account_id, gitlab_project_id, name, name_with_namespace, web_url,
                sync_enabled, last_sync_at, created_at
         FROM monitored_projects
         WHERE account_id = ? AND sync_enabled = 1
         ORDER BY id",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
}

/// Advance a project's incremental cursor.
pub async fn update_last_sync(
    pool: &sqlx::SqlitePool,
    project_id: i64,
    last_sync_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE monitored_projects SET last_sync_at = ? WHERE id = ?")
        .bind(last_sync_at)
        .bind(project_id)
        .execute(pool)
        .await?;

    Ok(())
}
