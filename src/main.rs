//! Stalewatch worker entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stalewatch::services::{
    GitLabClient, GitLabClientConfig, SyncOrchestrator, SyncScheduler, TokenCipher, TokenManager,
};
use stalewatch::{db, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::parse();
    let key = config.encryption_key_bytes()?;

    let pool = db::initialize(std::path::Path::new(&config.db_path))
        .await
        .with_context(|| format!("opening database at {}", config.db_path))?;

    let cipher = TokenCipher::new(key);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()
        .context("building HTTP client")?;

    let tokens = TokenManager::new(
        pool.clone(),
        cipher,
        http,
        config.gitlab_base_url.clone(),
        config.client_id.clone(),
        config.client_secret.clone(),
    );
    let client = GitLabClient::new(GitLabClientConfig {
        base_url: config.gitlab_base_url.clone(),
        timeout_secs: config.http_timeout_secs,
        rate_limit_low_water: config.rate_limit_low_water,
        rate_limit_max_attempts: config.rate_limit_max_attempts,
    })?;

    let orchestrator = Arc::new(SyncOrchestrator::new(
        pool,
        client,
        tokens,
        config.continue_on_project_error,
    ));

    let cancel = CancellationToken::new();
    let scheduler = SyncScheduler::start(orchestrator, &config.sync_cron, cancel).await?;

    info!("stalewatch worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;

    info!("shutting down");
    scheduler.shutdown().await;
    Ok(())
}
