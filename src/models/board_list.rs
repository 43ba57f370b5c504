//! Board list model.
//!
//! A read-only projection of the remote board's columns, replaced wholesale
//! per project on each sync pass.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One column of a project's board.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BoardList {
    pub id: i64,
    pub project_id: i64,
    pub gitlab_board_id: i64,
    pub label: String,
    pub color: String,
    pub position: i64,
}

/// Column definition as fetched from the remote board.
#[derive(Debug, Clone)]
pub struct NewBoardList {
    pub gitlab_board_id: i64,
    pub label: String,
    pub color: String,
    pub position: i64,
}

/// Replace a project's board lists with a fresh remote snapshot.
pub async fn replace_for_project(
    pool: &sqlx::SqlitePool,
    project_id: i64,
    lists: &[NewBoardList],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM board_lists WHERE project_id = ?")
        .bind(project_id)
        .execute(pool)
        .await?;

    for list in lists {
        sqlx::query(
            "INSERT INTO board_lists (project_id, gitlab_board_id, label, color, position)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(project_id)
        .bind(list.gitlab_board_id)
        .bind(&list.label)
        .bind(&list.color)
        .bind(list.position)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// A project's board columns in display order.
pub async fn list_for_project(
    pool: &sqlx::SqlitePool,
    project_id: i64,
) -> Result<Vec<BoardList>, sqlx::Error> {
    sqlx::query_as::<_, BoardList>(
        "SELECT id, project_id, gitlab_board_id, label, color, position
         FROM board_lists WHERE project_id = ? ORDER BY position",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}
