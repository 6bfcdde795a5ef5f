//! Asynchronous job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RegistrationResult;

/// Lifecycle state of a job.
///
/// `Timeout` is a client-side classification and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "timeout" => Some(JobStatus::Timeout),
            _ => None,
        }
    }

    /// Whether the job has finished, one way or another.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout
        )
    }

    /// Whether a stored record may move from `self` to `next`.
    ///
    /// `Processing -> Processing` is allowed so a retried attempt can refresh
    /// its progress.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a job that is being worked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub traces_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A job as stored and as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<JobProgress>,
    #[serde(default)]
    pub result: Option<RegistrationResult>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Job {
    pub fn pending(job_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            progress: None,
            result: None,
            error: None,
        }
    }
}

/// Acknowledgement returned when a job is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

impl JobAccepted {
    pub fn pending(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            message: "Trace registration job queued".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        use JobStatus::*;
        let all = [Pending, Processing, Completed, Failed, Timeout];

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        for next in all {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
            assert!(!next.can_transition_to(Pending));
            assert!(!next.can_transition_to(Timeout));
        }
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Timeout,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("success"), None);
    }

    #[test]
    fn test_pending_job_shape() {
        let job = Job::pending("job-1", Utc::now());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "pending");
        assert!(value["started_at"].is_null());
        assert!(value["result"].is_null());
    }
}
