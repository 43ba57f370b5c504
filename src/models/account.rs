//! Account credential model.
//!
//! `access_token` and `refresh_token` are stored encrypted; only the token
//! manager decrypts them. Everything else treats them as opaque strings.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A GitLab account whose projects are mirrored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,

    /// GitLab username, for log messages and board assignee matching.
    pub username: String,

    /// Numeric GitLab user id, used to pick the account's assigned board.
    pub gitlab_user_id: Option<i64>,

    /// Encrypted OAuth access token.
    pub access_token: String,

    /// Encrypted OAuth refresh token, if the provider issued one.
    pub refresh_token: Option<String>,

    /// Access token expiry as Unix seconds.
    pub expires_at: Option<i64>,

    pub created_at: i64,
}

/// Look up an account by id.
pub async fn get_account(
    pool: &sqlx::SqlitePool,
    account_id: i64,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        "SELECT id, username, gitlab_user_id, access_token, refresh_token, expires_at, created_at
         FROM accounts WHERE id = ?",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await
}

/// Insert an account with already-encrypted tokens. Returns the new id.
pub async fn insert_account(
    pool: &sqlx::SqlitePool,
    username: &str,
    gitlab_user_id: Option<i64>,
    encrypted_access_token: &str,
    encrypted_refresh_token: Option<&str>,
    expires_at: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO accounts (username, gitlab_user_id, access_token, refresh_token, expires_at)
         VALUES (?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(username)
    .bind(gitlab_user_id)
    .bind(encrypted_access_token)
    .bind(encrypted_refresh_token)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Replace an account's tokens after a successful refresh exchange.
pub async fn update_tokens(
    pool: &sqlx::SqlitePool,
    account_id: i64,
    encrypted_access_token: &str,
    encrypted_refresh_token: Option<&str>,
    expires_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE accounts SET
             access_token = ?,
             refresh_token = COALESCE(?, refresh_token),
             expires_at = ?
         WHERE id = ?",
    )
    .bind(encrypted_access_token)
    .bind(encrypted_refresh_token)
    .bind(expires_at)
    .bind(account_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Ids of accounts that own at least one sync-enabled project. These are the
/// accounts a scheduled sweep visits.
pub async fn list_syncable_account_ids(pool: &sqlx::SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT a.id FROM accounts a
         JOIN monitored_projects p ON p.account_id = a.id
         WHERE p.sync_enabled = 1
         ORDER BY a.id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
