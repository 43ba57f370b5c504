//! Issue model.
//!
//! Unlike merge requests, issues observed as closed are upserted rather than
//! deleted, so the board's Closed column keeps its cards.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An assignee entry as stored in the JSON `assignees` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignee {
    pub name: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// A mirrored issue row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub id: i64,
    pub project_id: i64,
    pub gitlab_issue_id: i64,

    /// Project-scoped issue number; (project_id, gitlab_issue_iid) is the upsert key.
    pub gitlab_issue_iid: i64,

    pub title: String,
    pub web_url: String,
    pub state: String,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,

    /// JSON array of [`Assignee`] objects.
    pub assignees: String,

    /// JSON array of label names.
    pub labels: String,

    pub gitlab_created_at: i64,
    pub gitlab_updated_at: i64,
    pub synced_at: i64,
}

impl Issue {
    pub fn labels_vec(&self) -> Vec<String> {
        serde_json::from_str(&self.labels).unwrap_or_default()
    }

    pub fn assignees_vec(&self) -> Vec<Assignee> {
        serde_json::from_str(&self.assignees).unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.state == "opened"
    }
}

/// Field set for an upsert, produced by the reconciler's mapper.
#[derive(Debug, Clone)]
pub struct NewIssue {
    pub project_id: i64,
    pub gitlab_issue_id: i64,
    pub gitlab_issue_iid: i64,
    pub title: String,
    pub web_url: String,
    pub state: String,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,
    pub assignees: String,
    pub labels: String,
    pub gitlab_created_at: i64,
    pub gitlab_updated_at: i64,
    pub synced_at: i64,
}

/// Insert or update an issue keyed by (project_id, gitlab_issue_iid).
/// Returns the local row id, which link reconciliation needs.
pub async fn upsert_issue(pool: &sqlx::SqlitePool, issue: &NewIssue) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO issues (
            project_id, gitlab_issue_id, gitlab_issue_iid, title, web_url, state,
            author_name, author_username, author_avatar_url, assignees, labels,
            gitlab_created_at, gitlab_updated_at, synced_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(project_id, gitlab_issue_iid) DO UPDATE SET
            gitlab_issue_id = excluded.gitlab_issue_id,
            title = excluded.title,
            web_url = excluded.web_url,
            state = excluded.state,
            author_name = excluded.author_name,
            author_username = excluded.author_username,
            author_avatar_url = excluded.author_avatar_url,
            assignees = excluded.assignees,
            labels = excluded.labels,
            gitlab_created_at = excluded.gitlab_created_at,
            gitlab_updated_at = excluded.gitlab_updated_at,
            synced_at = excluded.synced_at
        RETURNING id
        "#,
    )
    .bind(issue.project_id)
    .bind(issue.gitlab_issue_id)
    .bind(issue.gitlab_issue_iid)
    .bind(&issue.title)
    .bind(&issue.web_url)
    .bind(&issue.state)
    .bind(&issue.author_name)
    .bind(&issue.author_username)
    .bind(&issue.author_avatar_url)
    .bind(&issue.assignees)
    .bind(&issue.labels)
    .bind(issue.gitlab_created_at)
    .bind(issue.gitlab_updated_at)
    .bind(issue.synced_at)
    .fetch_one(pool)
    .await
}

/// Look up an issue by (project, remote iid).
pub async fn find_by_iid(
    pool: &sqlx::SqlitePool,
    project_id: i64,
    gitlab_issue_iid: i64,
) -> Result<Option<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(
        "SELECT * FROM issues WHERE project_id = ? AND gitlab_issue_iid = ?",
    )
    .bind(project_id)
    .bind(gitlab_issue_iid)
    .fetch_optional(pool)
    .await
}

/// All issues for a project, most recently updated first.
pub async fn list_for_project(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Vec<Issue>, sqlx::Error> {
    sqlx::query_as::<_, Issue>(
        "SELECT * FROM issues WHERE project_id = ? ORDER BY gitlab_updated_at DESC",
    )
    .bind(project_id)
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

    fn sample_issue(project_id: i64, iid: i64, state: &str) -> NewIssue {
        NewIssue {
            project_id,
            gitlab_issue_id: 2000 + iid,
            gitlab_issue_iid: iid,
            title: format!("Issue {}", iid),
            web_url: format!("https://gitlab.com/g/p/-/issues/{}", iid),
            state: state.into(),
            author_name: Some("Alice".into()),
            author_username: Some("alice".into()),
            author_avatar_url: None,
            assignees: "[]".into(),
            labels: r#"["To Do"]"#.into(),
            gitlab_created_at: 1_700_000_000,
            gitlab_updated_at: 1_700_000_100,
            synced_at: 1_700_000_200,
        }
    }

    #[tokio::test]
    async fn test_upsert_returns_stable_id() {
        let (_dir, pool, project_id) = setup_test_db().await;

        let open = sample_issue(project_id, 5, "opened");
        let id1 = upsert_issue(&pool, &open).await.unwrap();

        // Closing the issue updates in place instead of inserting
        let closed = sample_issue(project_id, 5, "closed");
        let id2 = upsert_issue(&pool, &closed).await.unwrap();
        assert_eq!(id1, id2);

        let row = find_by_iid(&pool, project_id, 5).await.unwrap().unwrap();
        assert_eq!(row.state, "closed");
        assert!(!row.is_open());
    }

    #[tokio::test]
    async fn test_list_for_project() {
        let (_dir, pool, project_id) = setup_test_db().await;
        upsert_issue(&pool, &sample_issue(project_id, 1, "opened")).await.unwrap();
        upsert_issue(&pool, &sample_issue(project_id, 2, "closed")).await.unwrap();

        let issues = list_for_project(&pool, project_id).await.unwrap();
        assert_eq!(issues.len(), 2);
    }
}
