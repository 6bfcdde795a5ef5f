use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use tracelift_config::Settings;
use tracelift_engine::HierarchyBuilder;
use tracelift_jobs::{
    spawn_reaper, JobQueue, JobStore, PoolConfig, RegistrationProcessor, RetryPolicy, WorkerPool,
};
use tracelift_server::{app, AppState};
use tracelift_sink::{LangfuseSink, RegistrationClient};

const REAP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.server.log_level)),
        )
        .compact()
        .init();

    let jobs = &settings.jobs;
    if let Some(dir) = jobs.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let store = Arc::new(JobStore::new(&jobs.db_path, jobs.job_ttl).context("failed to open job store")?);
    let queue = Arc::new(JobQueue::new(&jobs.db_path).context("failed to open job queue")?);

    let sink = LangfuseSink::new(&settings.backend).context("failed to build backend client")?;
    let processor = RegistrationProcessor::new(
        HierarchyBuilder::new(&settings.backend.project_name, &settings.backend.environment),
        RegistrationClient::new(Arc::new(sink)),
    );

    let pool = WorkerPool::new(
        queue.clone(),
        store.clone(),
        Arc::new(processor),
        PoolConfig {
            concurrency: jobs.worker_concurrency,
            max_jobs_per_worker: jobs.max_jobs_per_worker,
            lease: jobs.lease,
            poll_interval: jobs.poll_interval,
            retry: RetryPolicy {
                max_retries: jobs.max_retries,
                backoff: jobs.retry_backoff,
            },
        },
    );
    let heartbeats = pool.heartbeats();
    let pool = pool.spawn();
    let reaper = spawn_reaper(store.clone(), REAP_INTERVAL, pool.shutdown_signal());

    let state = Arc::new(AppState {
        queue,
        store,
        heartbeats,
        heartbeat_window: jobs.poll_interval.max(Duration::from_secs(5)) * 6,
    });

    let addr = settings.server.bind_addr();
    info!(
        addr = %addr,
        backend = %settings.backend.api_url,
        workers = jobs.worker_concurrency,
        "Starting server"
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining worker pool");
    pool.shutdown().await;
    reaper.await.ok();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
