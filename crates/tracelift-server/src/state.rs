use std::sync::Arc;
use std::time::Duration;

use tracelift_jobs::{JobQueue, JobStore, WorkerHeartbeats};

/// Shared handles for request handlers.
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub store: Arc<JobStore>,
    pub heartbeats: Arc<WorkerHeartbeats>,
    /// A worker counts as alive if it reported within this window.
    pub heartbeat_window: Duration,
}
