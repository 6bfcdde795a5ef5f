//! Asynchronous job pipeline for trace registration.
//!
//! - [`JobStore`] keeps the lifecycle record of every job, with TTL expiry
//! - [`JobQueue`] is the durable hand-off between the gateway and the workers
//! - [`WorkerPool`] pulls jobs, runs a [`JobProcessor`] under a [`RetryPolicy`]
//!   and writes the outcome back to the store

mod processor;
mod queue;
mod reaper;
mod retry;
mod store;
mod worker;

pub use processor::{JobProcessor, RegistrationProcessor};
pub use queue::{JobQueue, QueueError, ReservedJob};
pub use reaper::spawn_reaper;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{JobStore, StoreError};
pub use worker::{PoolConfig, PoolHandle, WorkerHeartbeats, WorkerPool};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracelift_core::TransportError;

/// Failure of a single processing attempt.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid job payload: {0}")]
    Payload(String),

    #[error("Processing panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Every fault except an undecodable payload gets another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobError::Payload(_))
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}
