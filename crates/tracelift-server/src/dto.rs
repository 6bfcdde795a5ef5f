use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tracelift_core::{JobStatus, RegistrationResult};

// === HTTP DTOs ===

/// Body of `GET /job-result/{job_id}` for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub result: RegistrationResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentHealth {
    Healthy,
    Unhealthy,
}

impl ComponentHealth {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            ComponentHealth::Healthy
        } else {
            ComponentHealth::Unhealthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Components {
    pub queue: ComponentHealth,
    pub worker: ComponentHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` when every component is, `degraded` otherwise.
    pub status: String,
    pub service: String,
    pub components: Components,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub description: String,
    pub endpoints: BTreeMap<String, String>,
    pub workflow: Vec<String>,
}
