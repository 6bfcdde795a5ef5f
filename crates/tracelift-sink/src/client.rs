//! Pushes a built hierarchy through a sink.

use std::sync::Arc;
use std::time::Instant;

use async_recursion::async_recursion;
use tracing::{debug, info};

use tracelift_core::{MappedObject, RegistrationResult, TransportError};
use tracelift_engine::Hierarchy;

use crate::{SinkObject, TraceSink};

/// Built once at startup and shared by every worker.
#[derive(Clone)]
pub struct RegistrationClient {
    sink: Arc<dyn TraceSink>,
}

impl RegistrationClient {
    pub fn new(sink: Arc<dyn TraceSink>) -> Self {
        Self { sink }
    }

    /// Creates the root and every node under it, then flushes.
    ///
    /// Object ids derive from the trace id and the node's position, so a
    /// re-submitted hierarchy addresses the same objects.
    pub async fn submit(&self, hierarchy: &Hierarchy) -> Result<RegistrationResult, TransportError> {
        let started = Instant::now();
        let trace_id = hierarchy.trace_id();

        self.sink.create(SinkObject::root(&hierarchy.root)).await?;

        let mut created = 0;
        for (position, node) in hierarchy.children.iter().enumerate() {
            let id = format!("{}-{}", trace_id, position);
            created += self.create_node(node, id, trace_id, None).await?;
        }

        self.sink.flush(trace_id).await?;

        let elapsed_ms = hierarchy.build_duration_ms + started.elapsed().as_millis() as u64;
        info!(
            trace_id = %trace_id,
            created,
            generations = hierarchy.counts.generations,
            tools = hierarchy.counts.tools,
            retrievers = hierarchy.counts.retrievers,
            spans = hierarchy.counts.spans,
            guardrails = hierarchy.counts.guardrails,
            events = hierarchy.counts.events,
            elapsed_ms,
            "Registered trace hierarchy"
        );

        Ok(RegistrationResult::success(
            trace_id,
            hierarchy.processed_traces,
            hierarchy.counts,
            elapsed_ms,
        ))
    }

    #[async_recursion]
    async fn create_node<'a>(
        &'a self,
        node: &'a MappedObject,
        id: String,
        trace_id: &'a str,
        parent_id: Option<&'a str>,
    ) -> Result<usize, TransportError> {
        debug!(id = %id, name = %node.name, kind = node.kind.as_str(), "Creating object");
        self.sink
            .create(SinkObject::node(node, id.clone(), trace_id, parent_id))
            .await?;

        let mut created = 1;
        for (position, child) in node.children.iter().enumerate() {
            let child_id = format!("{}.{}", id, position);
            created += self
                .create_node(child, child_id, trace_id, Some(id.as_str()))
                .await?;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemorySink, Primitive};
    use serde_json::json;
    use tracelift_core::RegistrationRequest;
    use tracelift_engine::HierarchyBuilder;

    fn hierarchy() -> Hierarchy {
        let request: RegistrationRequest = serde_json::from_value(json!({
            "input_text": "weather?",
            "agent_id": "AG1",
            "agent_alias_id": "A1",
            "session_id": "s-1",
            "trace_id": "trace-1",
            "traces": [
                { "trace": { "orchestrationTrace": {
                    "modelInvocationInput": { "text": "prompt" },
                    "rationale": { "text": "thinking" }
                }}},
                { "trace": { "failureTrace": { "failureReason": "throttled" } } }
            ]
        }))
        .unwrap();
        HierarchyBuilder::new("Agent Observability", "test").build(&request)
    }

    #[tokio::test]
    async fn test_submit_creates_every_node_then_flushes() {
        let sink = Arc::new(InMemorySink::new());
        let client = RegistrationClient::new(sink.clone());
        let h = hierarchy();

        let result = client.submit(&h).await.unwrap();

        assert_eq!(result.status, "success");
        assert_eq!(result.trace_id, "trace-1");
        assert_eq!(result.created_objects, 3);
        assert_eq!(result.processed_traces, 2);

        let objects = sink.objects();
        // root + generation + nested reasoning + failure
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[0].primitive, Primitive::Trace);
        assert_eq!(objects[1].id, "trace-1-0");
        assert_eq!(objects[2].id, "trace-1-0.0");
        assert_eq!(objects[2].parent_id.as_deref(), Some("trace-1-0"));
        assert_eq!(objects[3].id, "trace-1-1");
        assert_eq!(objects[3].primitive, Primitive::Event);
        assert_eq!(sink.flushes(), vec!["trace-1"]);
    }

    #[tokio::test]
    async fn test_resubmission_reuses_ids() {
        let sink = Arc::new(InMemorySink::new());
        let client = RegistrationClient::new(sink.clone());

        client.submit(&hierarchy()).await.unwrap();
        client.submit(&hierarchy()).await.unwrap();

        let ids: Vec<String> = sink.objects().into_iter().map(|o| o.id).collect();
        assert_eq!(ids[..4], ids[4..]);
    }

    #[tokio::test]
    async fn test_create_failure_skips_flush() {
        let sink = Arc::new(InMemorySink::new());
        sink.fail_create_at(2);
        let client = RegistrationClient::new(sink.clone());

        let err = client.submit(&hierarchy()).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
        assert!(sink.flushes().is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_is_reported() {
        let sink = Arc::new(InMemorySink::new());
        sink.fail_flush(true);
        let client = RegistrationClient::new(sink.clone());

        assert!(client.submit(&hierarchy()).await.is_err());
    }
}
