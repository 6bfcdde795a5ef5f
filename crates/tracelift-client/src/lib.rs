//! Client for the tracelift registration gateway.
//!
//! ```rust,no_run
//! # async fn run(request: tracelift_core::RegistrationRequest) -> Result<(), tracelift_client::ClientError> {
//! use std::time::Duration;
//! use tracelift_client::TraceliftClient;
//!
//! let client = TraceliftClient::new("http://localhost:8000")?;
//! let accepted = client.submit(&request).await?;
//! let outcome = client
//!     .wait_for_completion(&accepted.job_id, Duration::from_secs(2), Duration::from_secs(300))
//!     .await?;
//! println!("job finished as {}", outcome.status());
//! # Ok(())
//! # }
//! ```

mod poll;

pub use poll::{wait_for_terminal, PollOutcome};

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use tracelift_core::{Job, JobAccepted, RegistrationRequest, RegistrationResult};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("gateway returned {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Deserialize)]
struct ResultBody {
    result: RegistrationResult,
}

#[derive(Clone)]
pub struct TraceliftClient {
    client: Client,
    base_url: String,
}

impl TraceliftClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Per-request timeout; polling bounds are set on [`Self::wait_for_completion`].
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn submit(&self, request: &RegistrationRequest) -> Result<JobAccepted, ClientError> {
        let response = self
            .client
            .post(format!("{}/register-traces", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let accepted: JobAccepted = decode(check(response, "").await?).await?;
        info!(job_id = %accepted.job_id, traces = request.traces.len(), "Submitted registration");
        Ok(accepted)
    }

    pub async fn status(&self, job_id: &str) -> Result<Job, ClientError> {
        let response = self.get(&format!("job-status/{}", job_id)).await?;
        decode(check(response, job_id).await?).await
    }

    /// `None` while the job is still pending or processing.
    pub async fn result(&self, job_id: &str) -> Result<Option<RegistrationResult>, ClientError> {
        let response = self.get(&format!("job-result/{}", job_id)).await?;
        if response.status() == StatusCode::ACCEPTED {
            return Ok(None);
        }
        let body: ResultBody = decode(check(response, job_id).await?).await?;
        Ok(Some(body.result))
    }

    /// Polls `/job-status` until the job is terminal or `max_wait` elapses.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> Result<PollOutcome, ClientError> {
        let outcome =
            wait_for_terminal(job_id, poll_interval, max_wait, || self.status(job_id)).await?;
        debug!(job_id, status = %outcome.status(), "Stopped waiting for job");
        Ok(outcome)
    }

    async fn get(&self, path: &str) -> Result<Response, ClientError> {
        self.client
            .get(format!("{}/{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| ClientError::Request(e.to_string()))
    }
}

async fn check(response: Response, job_id: &str) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND && !job_id.is_empty() {
        return Err(ClientError::NotFound(job_id.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.detail)
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        detail,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    response
        .json()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tracelift_core::JobStatus;
    use tracelift_engine::HierarchyBuilder;
    use tracelift_jobs::{
        JobQueue, JobStore, PoolConfig, PoolHandle, RegistrationProcessor, RetryPolicy,
        WorkerHeartbeats, WorkerPool,
    };
    use tracelift_server::{app, AppState};
    use tracelift_sink::{InMemorySink, RegistrationClient};

    /// Serves the real router on an ephemeral port, optionally with workers.
    async fn gateway(with_workers: bool) -> (String, Option<PoolHandle>) {
        let queue = Arc::new(JobQueue::in_memory().unwrap());
        let store = Arc::new(JobStore::in_memory(Duration::from_secs(3600)).unwrap());

        let (heartbeats, pool) = if with_workers {
            let processor = RegistrationProcessor::new(
                HierarchyBuilder::new("Agent Observability", "test"),
                RegistrationClient::new(Arc::new(InMemorySink::new())),
            );
            let pool = WorkerPool::new(
                queue.clone(),
                store.clone(),
                Arc::new(processor),
                PoolConfig {
                    concurrency: 1,
                    max_jobs_per_worker: 10,
                    lease: Duration::from_secs(30),
                    poll_interval: Duration::from_millis(10),
                    retry: RetryPolicy::default(),
                },
            );
            (pool.heartbeats(), Some(pool.spawn()))
        } else {
            (Arc::new(WorkerHeartbeats::default()), None)
        };

        let state = Arc::new(AppState {
            queue,
            store,
            heartbeats,
            heartbeat_window: Duration::from_secs(30),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        (format!("http://{}", addr), pool)
    }

    fn request() -> RegistrationRequest {
        serde_json::from_value(json!({
            "input_text": "What's the weather?",
            "output_text": "Sunny.",
            "agent_id": "AG1",
            "agent_alias_id": "A1",
            "session_id": "s-1",
            "traces": [
                { "trace": { "orchestrationTrace": {
                    "modelInvocationInput": { "text": "prompt" },
                    "modelInvocationOutput": { "rawResponse": {
                        "content": "Sunny.",
                        "usage": { "inputTokens": 10, "outputTokens": 3 }
                    }}
                }}}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_wait_for_completion() {
        let (url, pool) = gateway(true).await;
        let client = TraceliftClient::new(&url).unwrap();

        let accepted = client.submit(&request()).await.unwrap();
        assert_eq!(accepted.status, JobStatus::Pending);

        let outcome = client
            .wait_for_completion(&accepted.job_id, Duration::from_millis(20), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(outcome.status(), JobStatus::Completed);

        let result = client.result(&accepted.job_id).await.unwrap().unwrap();
        assert_eq!(result.created_objects, 1);
        assert_eq!(result.object_counts.generations, 1);

        if let Some(pool) = pool {
            pool.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_without_workers() {
        let (url, _) = gateway(false).await;
        let client = TraceliftClient::new(&url).unwrap();
        let accepted = client.submit(&request()).await.unwrap();

        assert!(client.result(&accepted.job_id).await.unwrap().is_none());

        let outcome = client
            .wait_for_completion(&accepted.job_id, Duration::from_millis(10), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome.status(), JobStatus::Timeout);

        let job = client.status(&accepted.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_errors_carry_gateway_detail() {
        let (url, _) = gateway(false).await;
        let client = TraceliftClient::new(&url).unwrap();

        assert!(matches!(
            client.status("missing").await,
            Err(ClientError::NotFound(id)) if id == "missing"
        ));

        let mut bad = request();
        bad.agent_id = String::new();
        match client.submit(&bad).await {
            Err(ClientError::Status { status, detail }) => {
                assert_eq!(status, 422);
                assert!(detail.contains("agent_id"));
            }
            other => panic!("unexpected {:?}", other.map(|a| a.job_id)),
        }
    }
}
