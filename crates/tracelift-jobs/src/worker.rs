//! Worker pool that drains the job queue.
//!
//! A supervisor task keeps `concurrency` workers alive. Each worker leases
//! one job at a time, runs it through the [`JobProcessor`] and records the
//! outcome before acknowledging the queue entry. The lease is renewed while
//! the attempt runs. Workers retire after `max_jobs_per_worker` jobs and are
//! replaced with fresh ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use tracelift_core::{JobProgress, RegistrationRequest, RegistrationResult};

use crate::{JobError, JobProcessor, JobQueue, JobStore, ReservedJob, RetryDecision, RetryPolicy};

/// Upper bound on the renewal period, which is also the heartbeat cadence of
/// a busy worker.
const RENEW_EVERY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub concurrency: usize,
    pub max_jobs_per_worker: usize,
    pub lease: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_jobs_per_worker: 100,
            lease: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

/// Last time each live worker reported in. Used by the health endpoint.
#[derive(Default)]
pub struct WorkerHeartbeats {
    beats: Mutex<HashMap<usize, Instant>>,
}

impl WorkerHeartbeats {
    pub fn beat(&self, worker_id: usize) {
        let Ok(mut guard) = self.beats.lock() else {
            warn!("Failed to acquire heartbeat lock");
            return;
        };
        guard.insert(worker_id, Instant::now());
    }

    pub fn remove(&self, worker_id: usize) {
        if let Ok(mut guard) = self.beats.lock() {
            guard.remove(&worker_id);
        }
    }

    /// Number of workers that reported within `window`.
    pub fn alive_within(&self, window: Duration) -> usize {
        self.beats
            .lock()
            .map(|g| g.values().filter(|at| at.elapsed() <= window).count())
            .unwrap_or(0)
    }
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    store: Arc<JobStore>,
    processor: Arc<dyn JobProcessor>,
    config: PoolConfig,
    heartbeats: Arc<WorkerHeartbeats>,
}

/// Running pool. Dropping it stops the workers without waiting for them;
/// call [`shutdown`] to drain in-flight jobs.
///
/// [`shutdown`]: PoolHandle::shutdown
pub struct PoolHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PoolHandle {
    /// Subscribe to the pool's shutdown signal, e.g. for the reaper.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stops accepting new jobs and waits for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "Worker supervisor ended abnormally");
        }
    }
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        store: Arc<JobStore>,
        processor: Arc<dyn JobProcessor>,
        config: PoolConfig,
    ) -> Self {
        Self {
            queue,
            store,
            processor,
            config,
            heartbeats: Arc::new(WorkerHeartbeats::default()),
        }
    }

    pub fn heartbeats(&self) -> Arc<WorkerHeartbeats> {
        self.heartbeats.clone()
    }

    pub fn spawn(self) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(supervise(Arc::new(self), shutdown_rx));
        PoolHandle { shutdown_tx, join }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

async fn supervise(pool: Arc<WorkerPool>, mut shutdown: watch::Receiver<bool>) {
    let mut workers = JoinSet::new();
    let mut next_id = 0usize;

    for _ in 0..pool.config.concurrency.max(1) {
        workers.spawn(run_worker(pool.clone(), next_id, shutdown.clone()));
        next_id += 1;
    }
    info!(workers = next_id, "Worker pool started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            joined = workers.join_next() => {
                let Some(joined) = joined else { break };
                if let Err(e) = joined {
                    error!(error = %e, "Worker task died");
                }
                if *shutdown.borrow() {
                    continue;
                }
                workers.spawn(run_worker(pool.clone(), next_id, shutdown.clone()));
                debug!(worker_id = next_id, "Spawned replacement worker");
                next_id += 1;
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Worker task died during shutdown");
        }
    }
    info!("Worker pool stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

async fn run_worker(pool: Arc<WorkerPool>, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
    let mut handled = 0usize;
    debug!(worker_id, "Worker started");

    while !*shutdown.borrow() && handled < pool.config.max_jobs_per_worker.max(1) {
        pool.heartbeats.beat(worker_id);

        match pool.queue.reserve(pool.config.lease) {
            Ok(Some(job)) => {
                handle(&pool, worker_id, job).await;
                handled += 1;
                continue;
            }
            Ok(None) => {}
            Err(e) => error!(worker_id, error = %e, "Failed to reserve job"),
        }

        tokio::select! {
            _ = pool.queue.notified() => {}
            _ = tokio::time::sleep(pool.config.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    pool.heartbeats.remove(worker_id);
    debug!(worker_id, handled, "Worker retired");
}

async fn handle(pool: &WorkerPool, worker_id: usize, job: ReservedJob) {
    let ReservedJob {
        job_id,
        request,
        attempt,
        last_error,
    } = job;
    let retry = pool.config.retry;

    let request = match request {
        Ok(request) => request,
        Err(e) => {
            let error = JobError::Payload(e);
            warn!(worker_id, job_id = %job_id, error = %error, "Discarding undecodable job");
            finish_failed(pool, &job_id, &error.to_string());
            return;
        }
    };

    if attempt > retry.max_attempts() {
        // Lease expired after the last allowed attempt, typically a crash.
        let error = last_error.unwrap_or_else(|| "Retry budget exhausted".to_string());
        warn!(worker_id, job_id = %job_id, attempt, "Retry budget exhausted");
        finish_failed(pool, &job_id, &error);
        return;
    }

    let mut progress = JobProgress {
        attempt,
        max_attempts: retry.max_attempts(),
        traces_total: request.traces.len(),
        last_error,
    };
    match pool.store.mark_processing(&job_id, &progress) {
        Ok(true) => {}
        Ok(false) => {
            info!(worker_id, job_id = %job_id, "Job already finished; dropping redelivery");
            ack(pool, &job_id);
            return;
        }
        Err(e) => {
            // Leave the lease to expire so the job is retried.
            error!(worker_id, job_id = %job_id, error = %e, "Failed to mark job processing");
            return;
        }
    }

    info!(worker_id, job_id = %job_id, attempt, traces = progress.traces_total, "Processing job");
    let started = Instant::now();

    match run_leased(pool, worker_id, &job_id, request).await {
        Ok(result) => match pool.store.mark_completed(&job_id, &result) {
            Ok(_) => {
                info!(
                    worker_id,
                    job_id = %job_id,
                    trace_id = %result.trace_id,
                    created = result.created_objects,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                ack(pool, &job_id);
            }
            Err(e) => error!(worker_id, job_id = %job_id, error = %e, "Failed to record completion"),
        },
        Err(error) => match retry.decide(attempt, &error) {
            RetryDecision::RetryAfter(delay) => {
                warn!(
                    worker_id,
                    job_id = %job_id,
                    attempt,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Job attempt failed; retrying"
                );
                progress.last_error = Some(error.to_string());
                if let Err(e) = pool.store.mark_processing(&job_id, &progress) {
                    warn!(job_id = %job_id, error = %e, "Failed to record retry progress");
                }
                if let Err(e) = pool.queue.retry_later(&job_id, delay, &error.to_string()) {
                    error!(job_id = %job_id, error = %e, "Failed to schedule retry");
                }
            }
            RetryDecision::GiveUp => {
                error!(worker_id, job_id = %job_id, attempt, error = %error, "Job failed");
                finish_failed(pool, &job_id, &error.to_string());
            }
        },
    }
}

/// Awaits one attempt, renewing the job's lease and the worker's heartbeat
/// every third of the lease (at most [`RENEW_EVERY`]) until it settles.
async fn run_leased(
    pool: &WorkerPool,
    worker_id: usize,
    job_id: &str,
    request: RegistrationRequest,
) -> Result<RegistrationResult, JobError> {
    let lease = pool.config.lease;
    let period = (lease / 3).min(RENEW_EVERY).max(Duration::from_millis(1));
    let mut renew = tokio::time::interval(period);
    renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    renew.tick().await;

    let attempt = run(pool.processor.clone(), job_id, request);
    tokio::pin!(attempt);

    loop {
        tokio::select! {
            outcome = &mut attempt => return outcome,
            _ = renew.tick() => {
                if let Err(e) = pool.queue.extend_lease(job_id, lease) {
                    warn!(worker_id, job_id, error = %e, "Failed to renew lease");
                }
                pool.heartbeats.beat(worker_id);
            }
        }
    }
}

/// Runs the processor on its own task so a panic fails the attempt instead
/// of killing the worker.
async fn run(
    processor: Arc<dyn JobProcessor>,
    job_id: &str,
    request: RegistrationRequest,
) -> Result<RegistrationResult, JobError> {
    let owned_id = job_id.to_string();
    let task = tokio::spawn(async move { processor.process(&owned_id, &request).await });
    match task.await {
        Ok(outcome) => outcome,
        Err(e) => Err(JobError::Panicked(e.to_string())),
    }
}

fn finish_failed(pool: &WorkerPool, job_id: &str, error: &str) {
    match pool.store.mark_failed(job_id, error) {
        Ok(_) => ack(pool, job_id),
        Err(e) => error!(job_id, error = %e, "Failed to record failure"),
    }
}

fn ack(pool: &WorkerPool, job_id: &str) {
    if let Err(e) = pool.queue.ack(job_id) {
        error!(job_id, error = %e, "Failed to acknowledge job");
    }
}
