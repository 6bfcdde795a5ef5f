//! Registration requests and their results.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ObjectCounts, ValidationError};

/// One agent interaction to be registered.
///
/// `traces` is kept as raw JSON; each entry is decoded independently so one
/// bad event never rejects the whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub input_text: String,
    #[serde(default)]
    pub output_text: String,
    pub agent_id: String,
    pub agent_alias_id: String,
    pub session_id: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub traces: Vec<Value>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub duration_ms: Option<f64>,
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

impl RegistrationRequest {
    /// Rejects requests whose identity fields are blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("agent_id", &self.agent_id),
            ("agent_alias_id", &self.agent_alias_id),
            ("session_id", &self.session_id),
        ];
        match fields.iter().find(|(_, v)| v.trim().is_empty()) {
            Some((name, _)) => Err(ValidationError::EmptyField(*name)),
            None => Ok(()),
        }
    }

    /// Explicit trace id, ignoring blank values.
    pub fn explicit_trace_id(&self) -> Option<&str> {
        self.trace_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Summary of one registered interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub status: String,
    pub trace_id: String,
    pub processed_traces: usize,
    pub created_objects: usize,
    pub object_counts: ObjectCounts,
    pub processing_duration_ms: u64,
    pub message: String,
}

impl RegistrationResult {
    pub fn success(
        trace_id: impl Into<String>,
        processed_traces: usize,
        object_counts: ObjectCounts,
        processing_duration_ms: u64,
    ) -> Self {
        let created_objects = object_counts.total();
        Self {
            status: "success".to_string(),
            trace_id: trace_id.into(),
            processed_traces,
            created_objects,
            object_counts,
            processing_duration_ms,
            message: format!(
                "Registered {} objects from {} traces",
                created_objects, processed_traces
            ),
        }
    }
}
