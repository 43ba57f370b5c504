//! Sync run log.
//!
//! Append-only: one row per orchestration pass, never updated afterwards. The
//! dashboard shows the most recent entries so users can see failure history.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Retained log entries per account; older rows are pruned on append.
const MAX_RUNS_PER_ACCOUNT: i64 = 50;

/// Outcome status of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Completed,
    Failed,
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<&str> for SyncRunStatus {
    fn from(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// A logged sync pass.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncRun {
    pub id: i64,
    pub account_id: i64,
    pub status: String,
    pub mrs_fetched: i64,
    pub issues_fetched: i64,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub created_at: i64,
}

impl SyncRun {
    pub fn status_enum(&self) -> SyncRunStatus {
        SyncRunStatus::from(self.status.as_str())
    }
}

/// Field set for appending a run.
#[derive(Debug, Clone)]
pub struct NewSyncRun {
    pub account_id: i64,
    pub status: SyncRunStatus,
    pub mrs_fetched: i64,
    pub issues_fetched: i64,
    pub error: Option<String>,
    pub duration_ms: i64,
}

/// Append a run record and prune old entries for the account.
pub async fn append_run(pool: &sqlx::SqlitePool, run: &NewSyncRun) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sync_runs (account_id, status, mrs_fetched, issues_fetched, error, duration_ms)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(run.account_id)
    .bind(run.status.to_string())
    .bind(run.mrs_fetched)
    .bind(run.issues_fetched)
    .bind(&run.error)
    .bind(run.duration_ms)
    .execute(pool)
    .await?;

    sqlx::query(
        "DELETE FROM sync_runs WHERE account_id = ? AND id NOT IN (
             SELECT id FROM sync_runs WHERE account_id = ? ORDER BY id DESC LIMIT ?
         )",
    )
    .bind(run.account_id)
    .bind(run.account_id)
    .bind(MAX_RUNS_PER_ACCOUNT)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent runs for an account, newest first.
pub async fn recent_runs(
    pool: &sqlx::SqlitePool,
    account_id: i64,
    limit: i64,
) -> Result<Vec<SyncRun>, sqlx::Error> {
    sqlx::query_as::<_, SyncRun>(
        "SELECT id, account_id, status, mrs_fetched, issues_fetched, error, duration_ms, created_at
         FROM sync_runs WHERE account_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
