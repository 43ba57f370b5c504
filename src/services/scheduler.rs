//! Scheduled sync sweeps.
//!
//! Wraps the orchestrator in a cron-driven loop plus one startup sweep that
//! fires shortly after boot so a fresh process does not sit idle until the
//! first cron tick.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::SyncError;
use crate::services::sync_engine::SyncOrchestrator;

/// Delay before the startup sweep.
const STARTUP_SWEEP_DELAY: Duration = Duration::from_secs(5);

pub struct SyncScheduler {
    scheduler: JobScheduler,
    cancel: CancellationToken,
}

impl SyncScheduler {
    /// Build and start the scheduler: one cron job per `cron` expression tick
    /// plus a delayed startup sweep.
    pub async fn start(
        orchestrator: Arc<SyncOrchestrator>,
        cron: &str,
        cancel: CancellationToken,
    ) -> Result<Self, SyncError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| SyncError::internal(format!("Failed to create scheduler: {e}")))?;

        let job_orchestrator = orchestrator.clone();
        let job_cancel = cancel.clone();
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let orchestrator = job_orchestrator.clone();
            let cancel = job_cancel.clone();
            Box::pin(async move {
                run_sweep(&orchestrator, &cancel).await;
            })
        })
        .map_err(|e| SyncError::config(format!("Invalid sync cron expression '{cron}': {e}")))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| SyncError::internal(format!("Failed to schedule sync job: {e}")))?;

        scheduler
            .start()
            .await
            .map_err(|e| SyncError::internal(format!("Failed to start scheduler: {e}")))?;

        info!(cron, "sync scheduler started");

        let startup_orchestrator = orchestrator;
        let startup_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = startup_cancel.cancelled() => {}
                _ = tokio::time::sleep(STARTUP_SWEEP_DELAY) => {
                    info!("running startup sync sweep");
                    run_sweep(&startup_orchestrator, &startup_cancel).await;
                }
            }
        });

        Ok(Self { scheduler, cancel })
    }

    /// Stop the cron loop and signal in-flight passes to wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Err(e) = self.scheduler.shutdown().await {
            error!(error = %e, "scheduler shutdown failed");
        }
    }
}

async fn run_sweep(orchestrator: &SyncOrchestrator, cancel: &CancellationToken) {
    match orchestrator.sync_all_accounts(cancel).await {
        Ok(outcomes) => {
            let failed = outcomes.iter().filter(|(_, o)| !o.succeeded()).count();
            info!(accounts = outcomes.len(), failed, "sync sweep finished");
        }
        Err(e) => error!(error = %e, "sync sweep aborted"),
    }
}
