//! Issue ↔ merge request junction table.
//!
//! The link set for an issue is replaced wholesale on every sync pass that
//! covers the issue; the remote does not report relation removals as
//! deletions, so incremental patching would drift.

/// Replace all links for an issue with the given merge request ids.
pub async fn replace_links(
    pool: &sqlx::SqlitePool,
    issue_id: i64,
    merge_request_ids: &[i64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM issue_merge_requests WHERE issue_id = ?")
        .bind(issue_id)
        .execute(pool)
        .await?;

    for mr_id in merge_request_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO issue_merge_requests (issue_id, merge_request_id) VALUES (?, ?)",
        )
        .bind(issue_id)
        .bind(mr_id)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Merge request ids linked to an issue.
pub async fn linked_merge_request_ids(
    pool: &sqlx::SqlitePool,
    issue_id: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT merge_request_id FROM issue_merge_requests WHERE issue_id = ? ORDER BY merge_request_id",
    )
    .bind(issue_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
