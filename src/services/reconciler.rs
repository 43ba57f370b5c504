//! Remote-to-local reconciliation.
//!
//! Maps API payloads into rows and applies them per category. Open items are
//! upserted, merge requests that left the open state are deleted, closed
//! issues are kept (they feed the closed column of the board view), and issue
//! links and board lists are replaced wholesale.

use crate::db::DbPool;
use crate::error::SyncError;
use crate::models::board_list::{self, NewBoardList};
use crate::models::issue::{self, Assignee, NewIssue};
use crate::models::merge_request::{self, NewMergeRequest, Reviewer};
use crate::models::issue_link;
use crate::services::gitlab_client::{GitLabBoard, GitLabBoardList, GitLabIssue, GitLabMergeRequest};

/// Parse a GitLab ISO 8601 timestamp into Unix seconds.
fn parse_timestamp(raw: &str) -> Result<i64, SyncError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|e| SyncError::internal(format!("Invalid timestamp '{raw}': {e}")))
}

/// Map a remote merge request onto a local row for `project_id`.
pub fn map_merge_request(
    project_id: i64,
    mr: &GitLabMergeRequest,
    synced_at: i64,
) -> Result<NewMergeRequest, SyncError> {
    let reviewers: Vec<Reviewer> = mr
        .reviewers
        .iter()
        .map(|r| Reviewer {
            name: r.name.clone(),
            username: r.username.clone(),
            avatar_url: r.avatar_url.clone(),
        })
        .collect();

    Ok(NewMergeRequest {
        project_id,
        gitlab_mr_id: mr.id,
        gitlab_mr_iid: mr.iid,
        title: mr.title.clone(),
        web_url: mr.web_url.clone(),
        state: mr.state.clone(),
        author_name: Some(mr.author.name.clone()),
        author_username: Some(mr.author.username.clone()),
        author_avatar_url: mr.author.avatar_url.clone(),
        draft: mr.draft,
        source_branch: mr.source_branch.clone(),
        target_branch: mr.target_branch.clone(),
        gitlab_created_at: parse_timestamp(&mr.created_at)?,
        gitlab_updated_at: parse_timestamp(&mr.updated_at)?,
        pipeline_status: mr.head_pipeline.as_ref().map(|p| p.status.clone()),
        labels: serde_json::to_string(&mr.labels)?,
        reviewers: serde_json::to_string(&reviewers)?,
        synced_at,
    })
}

/// Map a remote issue onto a local row for `project_id`.
pub fn map_issue(
    project_id: i64,
    remote: &GitLabIssue,
    synced_at: i64,
) -> Result<NewIssue, SyncError> {
    let assignees: Vec<Assignee> = remote
        .assignees
        .iter()
        .map(|a| Assignee {
            name: a.name.clone(),
            username: a.username.clone(),
            avatar_url: a.avatar_url.clone(),
        })
        .collect();

    Ok(NewIssue {
        project_id,
        gitlab_issue_id: remote.id,
        gitlab_issue_iid: remote.iid,
        title: remote.title.clone(),
        web_url: remote.web_url.clone(),
        state: remote.state.clone(),
        author_name: Some(remote.author.name.clone()),
        author_username: Some(remote.author.username.clone()),
        author_avatar_url: remote.author.avatar_url.clone(),
        assignees: serde_json::to_string(&assignees)?,
        labels: serde_json::to_string(&remote.labels)?,
        gitlab_created_at: parse_timestamp(&remote.created_at)?,
        gitlab_updated_at: parse_timestamp(&remote.updated_at)?,
        synced_at,
    })
}

/// Pick the board to mirror: the one assigned to the account's GitLab user,
/// falling back to the first board.
pub fn select_board(boards: &[GitLabBoard], gitlab_user_id: Option<i64>) -> Option<&GitLabBoard> {
    gitlab_user_id
        .and_then(|uid| {
            boards
                .iter()
                .find(|b| b.assignee.as_ref().is_some_and(|a| a.id == uid))
        })
        .or_else(|| boards.first())
}

/// Applies remote snapshots to the local mirror.
pub struct Reconciler {
    pool: DbPool,
}

impl Reconciler {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Upsert the open merge requests of a project.
    pub async fn apply_open_merge_requests(
        &self,
        project_id: i64,
        mrs: &[GitLabMergeRequest],
        synced_at: i64,
    ) -> Result<(), SyncError> {
        for mr in mrs {
            let row = map_merge_request(project_id, mr, synced_at)?;
            merge_request::upsert_merge_request(&self.pool, &row).await?;
        }
        Ok(())
    }

    /// Drop local rows for merge requests observed merged or closed.
    /// Returns the number of rows removed.
    pub async fn remove_closed_merge_requests(
        &self,
        project_id: i64,
        mrs: &[GitLabMergeRequest],
    ) -> Result<u64, SyncError> {
        let iids: Vec<i64> = mrs.iter().map(|mr| mr.iid).collect();
        Ok(merge_request::delete_by_iids(&self.pool, project_id, &iids).await?)
    }

    /// Upsert one open issue and rebuild its merge request links.
    ///
    /// `related` is the remote's related-MR listing for the issue. Links are
    /// only created toward merge requests that exist locally; relations to
    /// untracked MRs are dropped without note.
    pub async fn apply_open_issue(
        &self,
        project_id: i64,
        remote: &GitLabIssue,
        related: &[GitLabMergeRequest],
        synced_at: i64,
    ) -> Result<(), SyncError> {
        let row = map_issue(project_id, remote, synced_at)?;
        let issue_id = issue::upsert_issue(&self.pool, &row).await?;

        let mut linked = Vec::new();
        for mr in related {
            if let Some(local) = merge_request::find_by_iid(&self.pool, project_id, mr.iid).await? {
                linked.push(local.id);
            }
        }

        issue_link::replace_links(&self.pool, issue_id, &linked).await?;
        Ok(())
    }

    /// Upsert recently closed issues. Closed issues stay in the mirror so the
    /// board's closed column has content.
    pub async fn apply_closed_issues(
        &self,
        project_id: i64,
        issues: &[GitLabIssue],
        synced_at: i64,
    ) -> Result<(), SyncError> {
        for remote in issues {
            let row = map_issue(project_id, remote, synced_at)?;
            issue::upsert_issue(&self.pool, &row).await?;
        }
        Ok(())
    }

    /// Replace the project's board lists with one board's label lists.
    pub async fn apply_board_lists(
        &self,
        project_id: i64,
        board_id: i64,
        lists: &[GitLabBoardList],
    ) -> Result<(), SyncError> {
        let rows: Vec<NewBoardList> = lists
            .iter()
            .map(|l| NewBoardList {
                gitlab_board_id: board_id,
                label: l.label.name.clone(),
                color: l.label.color.clone(),
                position: l.position,
            })
            .collect();

        board_list::replace_for_project(&self.pool, project_id, &rows).await?;
        Ok(())
    }
}
