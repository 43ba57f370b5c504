//! Merge request model.
//!
//! The local table mirrors only merge requests that were open as of the last
//! sync pass covering them; rows are deleted once the remote reports the MR as
//! merged or closed.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// State of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeRequestState {
    Opened,
    Merged,
    Closed,
}

impl From<&str> for MergeRequestState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            _ => Self::Opened,
        }
    }
}

impl std::fmt::Display for MergeRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opened => write!(f, "opened"),
            Self::Merged => write!(f, "merged"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A reviewer entry as stored in the JSON `reviewers` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    pub name: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// A mirrored merge request row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MergeRequest {
    pub id: i64,
    pub project_id: i64,
    pub gitlab_mr_id: i64,

    /// Project-scoped MR number; (project_id, gitlab_mr_iid) is the upsert key.
    pub gitlab_mr_iid: i64,

    pub title: String,
    pub web_url: String,
    pub state: String,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,
    pub draft: bool,
    pub source_branch: String,
    pub target_branch: String,
    pub gitlab_created_at: i64,
    pub gitlab_updated_at: i64,
    pub pipeline_status: Option<String>,

    /// JSON array of label names.
    pub labels: String,

    /// JSON array of [`Reviewer`] objects.
    pub reviewers: String,

    pub synced_at: i64,
}

impl MergeRequest {
    pub fn state_enum(&self) -> MergeRequestState {
        MergeRequestState::from(self.state.as_str())
    }

    pub fn labels_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.labels).unwrap_or_default()
    }

    pub fn reviewers_vec(&self) -> Vec<Reviewer> {
        serde_json::from_str(&self.reviewers).unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.state_enum() == MergeRequestState::Opened
    }
}

/// Field set for an upsert, produced by the reconciler's mapper.
#[derive(Debug, Clone)]
pub struct NewMergeRequest {
    pub project_id: i64,
    pub gitlab_mr_id: i64,
    pub gitlab_mr_iid: i64,
    pub title: String,
    pub web_url: String,
    pub state: String,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,
    pub draft: bool,
    pub source_branch: String,
    pub target_branch: String,
    pub gitlab_created_at: i64,
    pub gitlab_updated_at: i64,
    pub pipeline_status: Option<String>,
    pub labels: String,
    pub reviewers: String,
    pub synced_at: i64,
}

/// Insert or update a merge request keyed by (project_id, gitlab_mr_iid).
/// Returns the local row id.
pub async fn upsert_merge_request(
    pool: &sqlx::SqlitePool,
    mr: &NewMergeRequest,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO merge_requests (
            project_id, gitlab_mr_id, gitlab_mr_iid, title, web_url, state,
            author_name, author_username, author_avatar_url, draft,
            source_branch, target_branch, gitlab_created_at, gitlab_updated_at,
            pipeline_status, labels, reviewers, synced_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, gitlab_mr_iid) DO UPDATE SET
            gitlab_mr_id = excluded.gitlab_mr_id,
            title = excluded.title,
            web_url = excluded.web_url,
            state = excluded.state,
            author_name = excluded.author_name,
            author_username = excluded.author_username,
            author_avatar_url = excluded.author_avatar_url,
            draft = excluded.draft,
            source_branch = excluded.source_branch,
            target_branch = excluded.target_branch,
            gitlab_created_at = excluded.gitlab_created_at,
            gitlab_updated_at = excluded.gitlab_updated_at,
            pipeline_status = excluded.pipeline_status,
            labels = excluded.labels,
            reviewers = excluded.reviewers,
            synced_at = excluded.synced_at
        RETURNING id
        "#,
    )
    .bind(mr.project_id)
    .bind(mr.gitlab_mr_id)
    .bind(mr.gitlab_mr_iid)
    .bind(&mr.title)
    .bind(&mr.web_url)
    .bind(&mr.state)
    .bind(&mr.author_name)
    .bind(&mr.author_username)
    .bind(&mr.author_avatar_url)
    .bind(mr.draft)
    .bind(&mr.source_branch)
    .bind(&mr.target_branch)
    .bind(mr.gitlab_created_at)
    .bind(mr.gitlab_updated_at)
    .bind(&mr.pipeline_status)
    .bind(&mr.labels)
    .bind(&mr.reviewers)
    .bind(mr.synced_at)
    .fetch_one(pool)
    .await
}

/// Delete the rows for MRs observed merged/closed on the remote.
/// Returns the number of rows removed.
pub async fn delete_by_iids(
    pool: &sqlx::SqlitePool,
    project_id: i64,
    iids: &[i64],
) -> Result<u64, sqlx::Error> {
    if iids.is_empty() {
        return Ok(0);
    }

    let placeholders: Vec<&str> = iids.iter().map(|_| "?").collect();
    let query = format!(
        "DELETE FROM merge_requests WHERE project_id = ? AND gitlab_mr_iid IN ({})",
        placeholders.join(", ")
    );

    let mut query_builder = sqlx::query(&query).bind(project_id);
    for iid in iids {
        query_builder = query_builder.bind(*iid);
    }

    let result = query_builder.execute(pool).await?;
    Ok(result.rows_affected())
}

/// Look up a merge request by (project, remote iid).
pub async fn find_by_iid(
    pool: &sqlx::SqlitePool,
    project_id: i64,
    gitlab_mr_iid: i64,
) -> Result<Option<MergeRequest>, sqlx::Error> {
    sqlx::query_as::<_, MergeRequest>(
        "SELECT * FROM merge_requests WHERE project_id = ? AND gitlab_mr_iid = ?",
    )
    .bind(project_id)
    .bind(gitlab_mr_iid)
    .fetch_optional(pool)
    .await
}

/// Open MRs across an account's sync-enabled projects, oldest activity first.
/// This is the dashboard's working set.
pub async fn list_open_for_account(
    pool: &sqlx::SqlitePool,
    account_id: i64,
) -> Result<Vec<MergeRequest>, sqlx::Error> {
    sqlx::query_as::<_, MergeRequest>(
        "SELECT mr.* FROM merge_requests mr
         JOIN monitored_projects p ON p.id = mr.project_id
         WHERE p.account_id = ? AND p.sync_enabled = 1 AND mr.state = 'opened'
         ORDER BY mr.gitlab_updated_at ASC",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{account, project};
    use tempfile::tempdir;

    async fn setup_test_db() -> (tempfile::TempDir, sqlx::SqlitePool, i64) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let pool = db::initialize(&db_path).await.unwrap();
        let account_id = account::insert_account(&pool, "alice", None, "t", None, None)
            .await
            .unwrap();
        let project_id = project::insert_project(&pool, account_id, 10, "p", "g / p", "https://p", true)
            .await
            .unwrap();
        (dir, pool, project_id)
    }

    fn sample_mr(project_id: i64, iid: i64) -> NewMergeRequest {
        NewMergeRequest {
            project_id,
            gitlab_mr_id: 1000 + iid,
            gitlab_mr_iid: iid,
            title: format!("MR {}", iid),
            web_url: format!("https://gitlab.com/g/p/-/merge_requests/{}", iid),
            state: "opened".into(),
            author_name: Some("Alice".into()),
            author_username: Some("alice".into()),
            author_avatar_url: None,
            draft: false,
            source_branch: "feature".into(),
            target_branch: "main".into(),
            gitlab_created_at: 1_700_000_000,
            gitlab_updated_at: 1_700_000_100,
            pipeline_status: Some("success".into()),
            labels: r#"["bug"]"#.into(),
            reviewers: "[]".into(),
            synced_at: 1_700_000_200,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let (_dir, pool, project_id) = setup_test_db().await;
        let mr = sample_mr(project_id, 1);

        let first = upsert_merge_request(&pool, &mr).await.unwrap();
        let second = upsert_merge_request(&pool, &mr).await.unwrap();
        assert_eq!(first, second);

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM merge_requests")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_upsert_updates_fields() {
        let (_dir, pool, project_id) = setup_test_db().await;
        let mut mr = sample_mr(project_id, 1);
        upsert_merge_request(&pool, &mr).await.unwrap();

        mr.title = "Renamed".into();
        mr.pipeline_status = Some("failed".into());
        upsert_merge_request(&pool, &mr).await.unwrap();

        let row = find_by_iid(&pool, project_id, 1).await.unwrap().unwrap();
        assert_eq!(row.title, "Renamed");
        assert_eq!(row.pipeline_status.as_deref(), Some("failed"));
    }

    #[tokio::test]
    async fn test_delete_by_iids() {
        let (_dir, pool, project_id) = setup_test_db().await;
        for iid in 1..=3 {
            upsert_merge_request(&pool, &sample_mr(project_id, iid)).await.unwrap();
        }

        let removed = delete_by_iids(&pool, project_id, &[1, 3, 99]).await.unwrap();
        assert_eq!(removed, 2);
        assert!(find_by_iid(&pool, project_id, 1).await.unwrap().is_none());
        assert!(find_by_iid(&pool, project_id, 2).await.unwrap().is_some());

        let no_op = delete_by_iids(&pool, project_id, &[]).await.unwrap();
        assert_eq!(no_op, 0);
    }

    #[tokio::test]
    async fn test_list_open_orders_by_staleness() {
        let (_dir, pool, project_id) = setup_test_db().await;
        let mut fresh = sample_mr(project_id, 1);
        fresh.gitlab_updated_at = 1_700_000_500;
        let mut idle = sample_mr(project_id, 2);
        idle.gitlab_updated_at = 1_600_000_000;
        upsert_merge_request(&pool, &fresh).await.unwrap();
        upsert_merge_request(&pool, &idle).await.unwrap();

        let open = list_open_for_account(&pool, 1).await.unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open[0].gitlab_mr_iid, 2);
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(MergeRequestState::from("opened"), MergeRequestState::Opened);
        assert_eq!(MergeRequestState::from("MERGED"), MergeRequestState::Merged);
        assert_eq!(MergeRequestState::from("unknown"), MergeRequestState::Opened);
    }

    #[test]
    fn test_json_column_helpers() {
        let mut mr = MergeRequest {
            id: 1,
            project_id: 1,
            gitlab_mr_id: 1,
            gitlab_mr_iid: 1,
            title: String::new(),
            web_url: String::new(),
            state: "opened".into(),
            author_name: None,
            author_username: None,
            author_avatar_url: None,
            draft: false,
            source_branch: String::new(),
            target_branch: String::new(),
            gitlab_created_at: 0,
            gitlab_updated_at: 0,
            pipeline_status: None,
            labels: r#"["bug","backend"]"#.into(),
            reviewers: r#"[{"name":"Bob","username":"bob","avatar_url":null}]"#.into(),
            synced_at: 0,
        };
        assert_eq!(mr.labels_vec(), vec!["bug", "backend"]);
        assert_eq!(mr.reviewers_vec()[0].username, "bob");

        mr.labels = "not json".into();
        assert!(mr.labels_vec().is_empty());
    }
}
