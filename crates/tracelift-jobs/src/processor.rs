use async_trait::async_trait;
use tracing::debug;

use tracelift_core::{RegistrationRequest, RegistrationResult};
use tracelift_engine::HierarchyBuilder;
use tracelift_sink::RegistrationClient;

use crate::JobError;

/// Runs one attempt of a job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(
        &self,
        job_id: &str,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResult, JobError>;
}

/// Normalizes the traces and pushes the hierarchy to the backend.
pub struct RegistrationProcessor {
    builder: HierarchyBuilder,
    client: RegistrationClient,
}

impl RegistrationProcessor {
    pub fn new(builder: HierarchyBuilder, client: RegistrationClient) -> Self {
        Self { builder, client }
    }
}

#[async_trait]
impl JobProcessor for RegistrationProcessor {
    async fn process(
        &self,
        job_id: &str,
        request: &RegistrationRequest,
    ) -> Result<RegistrationResult, JobError> {
        let hierarchy = self.builder.build(request);
        debug!(
            job_id,
            trace_id = %hierarchy.trace_id(),
            objects = hierarchy.created_objects(),
            "Built hierarchy"
        );
        Ok(self.client.submit(&hierarchy).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tracelift_sink::InMemorySink;

    fn request() -> RegistrationRequest {
        serde_json::from_value(json!({
            "input_text": "hi",
            "agent_id": "AG1",
            "agent_alias_id": "A1",
            "session_id": "s-1",
            "traces": [{ "trace": { "failureTrace": { "failureReason": "boom" } } }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_process_registers_through_sink() {
        let sink = Arc::new(InMemorySink::new());
        let processor = RegistrationProcessor::new(
            HierarchyBuilder::new("Agent Observability", "test"),
            RegistrationClient::new(sink.clone()),
        );

        let result = processor.process("job-1", &request()).await.unwrap();
        assert_eq!(result.created_objects, 1);
        assert_eq!(sink.objects().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_retryable() {
        let sink = Arc::new(InMemorySink::new());
        sink.fail_flush(true);
        let processor = RegistrationProcessor::new(
            HierarchyBuilder::new("Agent Observability", "test"),
            RegistrationClient::new(sink),
        );

        let err = processor.process("job-1", &request()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
