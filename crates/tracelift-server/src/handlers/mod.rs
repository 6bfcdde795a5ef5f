//! HTTP route handlers for the registration gateway.

pub mod jobs;

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::dto::{ComponentHealth, Components, HealthResponse, ServiceInfo};
use crate::{AppState, SERVICE_NAME};

/// GET /health - Queue and worker liveness.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let queue = match state.queue.ping() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Queue health check failed");
            false
        }
    };
    let worker = state.heartbeats.alive_within(state.heartbeat_window) > 0;

    let status = if queue && worker { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        service: SERVICE_NAME.to_string(),
        components: Components {
            queue: ComponentHealth::from_ok(queue),
            worker: ComponentHealth::from_ok(worker),
        },
    })
}

/// GET / - Service description.
pub async fn root() -> Json<ServiceInfo> {
    let endpoints = [
        ("register_traces", "/register-traces"),
        ("job_status", "/job-status/{job_id}"),
        ("job_result", "/job-result/{job_id}"),
        ("health", "/health"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Json(ServiceInfo {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Normalizes agent execution traces and registers them asynchronously"
            .to_string(),
        endpoints,
        workflow: vec![
            "POST /register-traces -> job_id".to_string(),
            "GET /job-status/{job_id} -> progress".to_string(),
            "GET /job-result/{job_id} -> registration result".to_string(),
        ],
    })
}
