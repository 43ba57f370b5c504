//! Dashboard projection over the mirror.
//!
//! Pulls an account's open merge requests, oldest activity first, and tags
//! each with its idle time and staleness. Serialization mirrors what the
//! review dashboard consumes.

use serde::Serialize;

use crate::db::DbPool;
use crate::error::SyncError;
use crate::models::merge_request::{self, MergeRequest};
use crate::services::staleness;

/// An open merge request annotated with staleness data.
#[derive(Debug, Serialize)]
pub struct DashboardMergeRequest {
    #[serde(flatten)]
    pub merge_request: MergeRequest,
    pub idle_days: i64,
    pub is_stale: bool,
}

/// Aggregate counts over the open merge request set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub total: usize,
    pub stale: usize,
    pub active: usize,
    pub draft: usize,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub merge_requests: Vec<DashboardMergeRequest>,
    pub stats: DashboardStats,
}

/// Build the dashboard view for one account at instant `now`.
pub async fn open_merge_requests(
    pool: &DbPool,
    account_id: i64,
    now: i64,
    stale_threshold_days: i64,
) -> Result<Dashboard, SyncError> {
    let rows = merge_request::list_open_for_account(pool, account_id).await?;

    let merge_requests: Vec<DashboardMergeRequest> = rows
        .into_iter()
        .map(|mr| {
            let idle = staleness::idle_days(now, mr.gitlab_updated_at);
            DashboardMergeRequest {
                idle_days: idle,
                is_stale: idle >= stale_threshold_days,
                merge_request: mr,
            }
        })
        .collect();

    let stats = DashboardStats {
        total: merge_requests.len(),
        stale: merge_requests.iter().filter(|m| m.is_stale).count(),
        active: merge_requests.iter().filter(|m| !m.is_stale).count(),
        draft: merge_requests
            .iter()
            .filter(|m| m.merge_request.draft)
            .count(),
    };

    Ok(Dashboard {
        merge_requests,
        stats,
    })
}
