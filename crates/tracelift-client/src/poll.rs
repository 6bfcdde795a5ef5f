//! Bounded polling for job completion.
//!
//! Giving up is purely local: the job keeps running and its stored record is
//! never touched.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use tracelift_core::{Job, JobStatus};

/// How a bounded wait ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The job reached `completed` or `failed`.
    Finished(Job),
    /// `max_wait` elapsed first.
    TimedOut {
        job_id: String,
        last_status: Option<JobStatus>,
        waited: Duration,
    },
}

impl PollOutcome {
    /// Terminal status from the caller's point of view.
    pub fn status(&self) -> JobStatus {
        match self {
            PollOutcome::Finished(job) => job.status,
            PollOutcome::TimedOut { .. } => JobStatus::Timeout,
        }
    }
}

/// Calls `fetch` every `interval` until the job is terminal or `max_wait`
/// has passed. The job is always fetched at least once. Errors from `fetch`
/// end the wait.
pub async fn wait_for_terminal<F, Fut, E>(
    job_id: &str,
    interval: Duration,
    max_wait: Duration,
    mut fetch: F,
) -> Result<PollOutcome, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Job, E>>,
{
    let started = Instant::now();
    let deadline = started + max_wait;

    let last_status = loop {
        let job = fetch().await?;
        if job.status.is_terminal() {
            return Ok(PollOutcome::Finished(job));
        }
        debug!(job_id, status = %job.status, "Job not finished yet");

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break Some(job.status);
        }
        tokio::time::sleep(interval.min(remaining)).await;
    };

    Ok(PollOutcome::TimedOut {
        job_id: job_id.to_string(),
        last_status,
        waited: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracelift_core::{JobProgress, ObjectCounts, RegistrationResult};
    use tracelift_jobs::{JobStore, StoreError};

    fn fetcher(
        store: Arc<JobStore>,
        job_id: &'static str,
    ) -> impl FnMut() -> std::future::Ready<Result<Job, StoreError>> {
        move || {
            let job = store
                .get(job_id)
                .map(|j| j.unwrap_or_else(|| panic!("{} missing", job_id)));
            std::future::ready(job)
        }
    }

    #[tokio::test]
    async fn test_timeout_leaves_job_untouched() {
        let store = Arc::new(JobStore::in_memory(Duration::from_secs(3600)).unwrap());
        store.create_pending("job-1").unwrap();

        let outcome = wait_for_terminal(
            "job-1",
            Duration::from_millis(10),
            Duration::from_millis(60),
            fetcher(store.clone(), "job-1"),
        )
        .await
        .unwrap();

        assert_eq!(outcome.status(), JobStatus::Timeout);
        match outcome {
            PollOutcome::TimedOut { last_status, waited, .. } => {
                assert_eq!(last_status, Some(JobStatus::Pending));
                assert!(waited >= Duration::from_millis(60));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(store.get("job-1").unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_returns_once_terminal() {
        let store = Arc::new(JobStore::in_memory(Duration::from_secs(3600)).unwrap());
        store.create_pending("job-1").unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                let progress = JobProgress {
                    attempt: 1,
                    max_attempts: 4,
                    traces_total: 0,
                    last_error: None,
                };
                store.mark_processing("job-1", &progress).unwrap();
                let result = RegistrationResult::success("t", 0, ObjectCounts::default(), 1);
                store.mark_completed("job-1", &result).unwrap();
            })
        };

        let outcome = wait_for_terminal(
            "job-1",
            Duration::from_millis(10),
            Duration::from_secs(5),
            fetcher(store.clone(), "job-1"),
        )
        .await
        .unwrap();
        writer.await.unwrap();

        assert_eq!(outcome.status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_zero_wait_still_fetches_once() {
        let store = Arc::new(JobStore::in_memory(Duration::from_secs(3600)).unwrap());
        store.create_pending("job-1").unwrap();
        store.mark_failed("job-1", "backend down").unwrap();

        let outcome = wait_for_terminal(
            "job-1",
            Duration::from_millis(10),
            Duration::ZERO,
            fetcher(store.clone(), "job-1"),
        )
        .await
        .unwrap();
        assert_eq!(outcome.status(), JobStatus::Failed);

        store.create_pending("job-2").unwrap();
        let outcome = wait_for_terminal(
            "job-2",
            Duration::from_millis(10),
            Duration::ZERO,
            fetcher(store.clone(), "job-2"),
        )
        .await
        .unwrap();
        match outcome {
            PollOutcome::TimedOut { last_status, .. } => {
                assert_eq!(last_status, Some(JobStatus::Pending))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_error_ends_wait() {
        let outcome = wait_for_terminal("job-1", Duration::from_millis(10), Duration::from_secs(1), || {
            std::future::ready(Err::<Job, _>("gone"))
        })
        .await;
        assert_eq!(outcome.unwrap_err(), "gone");
    }
}
