//! Sync orchestration.
//!
//! One pass per account: acquire a token, walk the account's sync-enabled
//! projects in order, reconcile each category, advance the per-project cursor,
//! and record exactly one run row. A pass never raises to its caller; the
//! outcome carries the status, totals, and error text.
//!
//! Category order per project is fixed: open merge requests first so issue
//! link reconciliation can resolve them, then closed merge requests, open
//! issues with links, closed issues, board lists, and finally the cursor
//! update. The cursor only advances after every category succeeded, so a
//! failed project is re-fetched in full on the next pass.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{SecondsFormat, TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::DbPool;
use crate::error::SyncError;
use crate::models::account::{self, Account};
use crate::models::project::{self, MonitoredProject};
use crate::models::sync_run::{self, NewSyncRun, SyncRunStatus};
use crate::services::gitlab_client::GitLabClient;
use crate::services::reconciler::{self, Reconciler};
use crate::services::token_manager::TokenManager;

/// Current time as Unix seconds.
fn now() -> i64 {
    Utc::now().timestamp()
}

/// Render a Unix cursor as the ISO 8601 instant the API filters on.
fn cursor_to_iso(ts: i64) -> Option<String> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Result of one sync pass over an account.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub status: SyncRunStatus,
    pub mrs_fetched: i64,
    pub issues_fetched: i64,
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl SyncOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == SyncRunStatus::Completed
    }
}

#[derive(Default)]
struct Totals {
    mrs: i64,
    issues: i64,
}

/// Drives sync passes and guards against overlapping runs per account.
pub struct SyncOrchestrator {
    pool: DbPool,
    client: GitLabClient,
    tokens: TokenManager,
    reconciler: Reconciler,
    continue_on_project_error: bool,
    in_flight: Mutex<HashSet<i64>>,
}

impl SyncOrchestrator {
    pub fn new(
        pool: DbPool,
        client: GitLabClient,
        tokens: TokenManager,
        continue_on_project_error: bool,
    ) -> Self {
        let reconciler = Reconciler::new(pool.clone());
        Self {
            pool,
            client,
            tokens,
            reconciler,
            continue_on_project_error,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run one sync pass for an account.
    ///
    /// Appends exactly one run row, except when another pass already holds
    /// the account; that case fails fast without a row.
    pub async fn sync_account(
        &self,
        account_id: i64,
        cancel: &CancellationToken,
    ) -> SyncOutcome {
        if !self.claim(account_id) {
            let err = SyncError::SyncInProgress { account_id };
            warn!(account_id, "skipping sync, previous pass still running");
            return SyncOutcome {
                status: SyncRunStatus::Failed,
                mrs_fetched: 0,
                issues_fetched: 0,
                error: Some(err.to_string()),
                duration_ms: 0,
            };
        }

        let start = Instant::now();
        let mut totals = Totals::default();
        let result = self.run_pass(account_id, cancel, &mut totals).await;
        self.release(account_id);

        let duration_ms = start.elapsed().as_millis() as i64;
        let outcome = match result {
            Ok(()) => SyncOutcome {
                status: SyncRunStatus::Completed,
                mrs_fetched: totals.mrs,
                issues_fetched: totals.issues,
                error: None,
                duration_ms,
            },
            Err(e) => SyncOutcome {
                status: SyncRunStatus::Failed,
                mrs_fetched: totals.mrs,
                issues_fetched: totals.issues,
                error: Some(e.to_string()),
                duration_ms,
            },
        };

        let run = NewSyncRun {
            account_id,
            status: outcome.status,
            mrs_fetched: outcome.mrs_fetched,
            issues_fetched: outcome.issues_fetched,
            error: outcome.error.clone(),
            duration_ms: outcome.duration_ms,
        };
        if let Err(e) = sync_run::append_run(&self.pool, &run).await {
            error!(account_id, error = %e, "failed to record sync run");
        }

        match &outcome.error {
            None => info!(
                account_id,
                mrs = outcome.mrs_fetched,
                issues = outcome.issues_fetched,
                duration_ms = outcome.duration_ms,
                "sync pass completed"
            ),
            Some(err) => warn!(account_id, error = %err, "sync pass failed"),
        }

        outcome
    }

    /// Sweep every account that owns at least one sync-enabled project. One
    /// failing account never stops the sweep.
    pub async fn sync_all_accounts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<(i64, SyncOutcome)>, SyncError> {
        let account_ids = account::list_syncable_account_ids(&self.pool).await?;
        info!(accounts = account_ids.len(), "starting sync sweep");

        let mut outcomes = Vec::with_capacity(account_ids.len());
        for account_id in account_ids {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self.sync_account(account_id, cancel).await;
            outcomes.push((account_id, outcome));
        }
        Ok(outcomes)
    }

    fn claim(&self, account_id: i64) -> bool {
        // Mutex poisoning cannot happen here; the critical section does not panic
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.insert(account_id)
    }

    fn release(&self, account_id: i64) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&account_id);
    }

    async fn run_pass(
        &self,
        account_id: i64,
        cancel: &CancellationToken,
        totals: &mut Totals,
    ) -> Result<(), SyncError> {
        let token = self.tokens.get_valid_token(account_id).await?;
        let account = account::get_account(&self.pool, account_id)
            .await?
            .ok_or_else(|| SyncError::not_found_with_id("account", account_id.to_string()))?;

        let projects = project::list_sync_enabled(&self.pool, account_id).await?;
        let mut failures: Vec<String> = Vec::new();

        for project in &projects {
            if cancel.is_cancelled() {
                return Err(SyncError::internal("Sync cancelled"));
            }

            match self.sync_project(&token, &account, project, totals).await {
                Ok(()) => {}
                Err(e) if self.continue_on_project_error => {
                    warn!(
                        account_id,
                        project = %project.name_with_namespace,
                        error = %e,
                        "project sync failed, continuing with remaining projects"
                    );
                    failures.push(format!("{}: {}", project.name_with_namespace, e));
                }
                Err(e) => return Err(e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SyncError::internal(format!(
                "{} project(s) failed: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    /// Reconcile one project end to end. The cursor update is last; a failure
    /// anywhere leaves `last_sync_at` untouched.
    async fn sync_project(
        &self,
        token: &str,
        account: &Account,
        project: &MonitoredProject,
        totals: &mut Totals,
    ) -> Result<(), SyncError> {
        let cursor = project.last_sync_at.and_then(cursor_to_iso);
        let cursor = cursor.as_deref();
        let remote_id = project.gitlab_project_id;

        let open_mrs = self
            .client
            .fetch_open_merge_requests(token, remote_id, cursor)
            .await?;
        self.reconciler
            .apply_open_merge_requests(project.id, &open_mrs, now())
            .await?;
        totals.mrs += open_mrs.len() as i64;

        let closed_mrs = self
            .client
            .fetch_recently_closed_merge_requests(token, remote_id, cursor)
            .await?;
        let removed = self
            .reconciler
            .remove_closed_merge_requests(project.id, &closed_mrs)
            .await?;
        if removed > 0 {
            info!(project = %project.name_with_namespace, removed, "purged closed merge requests");
        }

        let open_issues = self.client.fetch_open_issues(token, remote_id, cursor).await?;
        for remote_issue in &open_issues {
            let related = self
                .client
                .fetch_issue_related_merge_requests(token, remote_id, remote_issue.iid)
                .await?;
            self.reconciler
                .apply_open_issue(project.id, remote_issue, &related, now())
                .await?;
        }
        totals.issues += open_issues.len() as i64;

        let closed_issues = self
            .client
            .fetch_recently_closed_issues(token, remote_id, cursor)
            .await?;
        self.reconciler
            .apply_closed_issues(project.id, &closed_issues, now())
            .await?;

        let boards = self.client.fetch_project_boards(token, remote_id).await?;
        if let Some(board) = reconciler::select_board(&boards, account.gitlab_user_id) {
            let lists = self
                .client
                .fetch_board_lists(token, remote_id, board.id)
                .await?;
            self.reconciler
                .apply_board_lists(project.id, board.id, &lists)
                .await?;
        }

        project::update_last_sync(&self.pool, project.id, now()).await?;
        Ok(())
    }
}
