//! Job submission and polling handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use tracing::{error, info};

use tracelift_core::{Job, JobAccepted, JobStatus, RegistrationRequest, ValidationError};

use crate::dto::JobResultResponse;
use crate::error::AppError;
use crate::AppState;

/// POST /register-traces - Validate and enqueue a registration.
pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<Json<JobAccepted>, AppError> {
    let Json(request) = payload.map_err(|e| ValidationError::Body(e.body_text()))?;
    request.validate()?;

    let job_id = state.queue.enqueue(&request).map_err(|e| {
        error!(error = %e, "Failed to enqueue job");
        AppError::Internal("Failed to queue job".into())
    })?;

    // A fast worker may already have moved the job on; the store keeps the later state.
    state.store.create_pending(&job_id).map_err(|e| {
        error!(job_id = %job_id, error = %e, "Failed to record pending job");
        AppError::Internal("Failed to record job".into())
    })?;

    info!(
        job_id = %job_id,
        agent_id = %request.agent_id,
        session_id = %request.session_id,
        traces = request.traces.len(),
        "Queued registration job"
    );

    Ok(Json(JobAccepted::pending(job_id)))
}

/// GET /job-status/{job_id} - Current job record.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, AppError> {
    Ok(Json(lookup(&state, &job_id)?))
}

/// GET /job-result/{job_id} - Final result once the job finished.
pub async fn result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResultResponse>, AppError> {
    let job = lookup(&state, &job_id)?;

    match job.status {
        JobStatus::Completed => {
            let result = job.result.ok_or_else(|| {
                error!(job_id = %job_id, "Completed job has no result");
                AppError::Internal("Completed job has no result".into())
            })?;
            Ok(Json(JobResultResponse {
                job_id: job.job_id,
                status: JobStatus::Completed,
                result,
            }))
        }
        JobStatus::Failed | JobStatus::Timeout => Err(AppError::JobFailed(format!(
            "Job failed: {}",
            job.error.as_deref().unwrap_or("unknown error")
        ))),
        JobStatus::Pending | JobStatus::Processing => Err(AppError::NotReady(format!(
            "Job is still {}",
            job.status
        ))),
    }
}

fn lookup(state: &AppState, job_id: &str) -> Result<Job, AppError> {
    state
        .store
        .get(job_id)
        .map_err(|e| {
            error!(job_id, error = %e, "Failed to read job");
            AppError::Internal("Failed to read job".into())
        })?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))
}
