//! Assembles mapped objects under a single root trace per request.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use tracelift_core::{Level, MappedObject, ObjectCounts, ObjectKind, RegistrationRequest};

use crate::mapper::map_value;

/// Maps one raw event. Swappable so the isolation path can be exercised.
pub type MapFn = fn(&Value) -> Vec<MappedObject>;

/// The top-level node for one agent interaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RootTrace {
    pub id: String,
    pub name: String,
    pub input: Value,
    pub output: Value,
    pub session_id: String,
    pub user_id: String,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// A root trace and everything attached under it.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    pub root: RootTrace,
    pub children: Vec<MappedObject>,
    pub counts: ObjectCounts,
    pub processed_traces: usize,
    pub build_duration_ms: u64,
}

impl Hierarchy {
    pub fn trace_id(&self) -> &str {
        &self.root.id
    }

    /// Number of nodes under the root, nested ones included.
    pub fn created_objects(&self) -> usize {
        self.children.iter().map(MappedObject::count).sum()
    }
}

pub struct HierarchyBuilder {
    project_name: String,
    environment: String,
    mapper: MapFn,
}

impl HierarchyBuilder {
    pub fn new(project_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            environment: environment.into(),
            mapper: map_value,
        }
    }

    pub fn with_mapper(mut self, mapper: MapFn) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn build(&self, request: &RegistrationRequest) -> Hierarchy {
        let started = Instant::now();
        let trace_id = derive_trace_id(request);

        info!(
            trace_id = %trace_id,
            agent_id = %request.agent_id,
            session_id = %request.session_id,
            traces = request.traces.len(),
            "Building trace hierarchy"
        );

        let mut children = Vec::new();
        let mut counts = ObjectCounts::default();

        for (index, raw) in request.traces.iter().enumerate() {
            let mapper = self.mapper;
            let mapped = panic::catch_unwind(AssertUnwindSafe(|| mapper(raw)));

            let objects = match mapped {
                Ok(objects) => objects
                    .into_iter()
                    .map(|obj| with_trace_index(obj, index))
                    .collect(),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(index, error = %message, "Trace processing panicked");
                    vec![processing_error(index, raw, &message)]
                }
            };

            for obj in &objects {
                obj.tally(&mut counts);
            }
            debug!(index, objects = objects.len(), "Mapped trace event");
            children.extend(objects);
        }

        let build_duration_ms = started.elapsed().as_millis() as u64;
        let mut root = self.root(request, trace_id);
        root.output = json!({
            "response": request.output_text,
            "processing_summary": {
                "processed_traces": request.traces.len(),
                "created_objects": counts.total(),
                "object_counts": counts,
                "processing_duration_ms": build_duration_ms,
            }
        });

        Hierarchy {
            root,
            children,
            counts,
            processed_traces: request.traces.len(),
            build_duration_ms,
        }
    }

    fn root(&self, request: &RegistrationRequest, trace_id: String) -> RootTrace {
        let tags: Vec<String> = request.tags.iter().cloned().collect();

        let mut metadata = Map::new();
        metadata.insert("agent_id".into(), json!(request.agent_id));
        metadata.insert("agent_alias_id".into(), json!(request.agent_alias_id));
        metadata.insert("model_id".into(), json!(request.model_id));
        metadata.insert("session_id".into(), json!(request.session_id));
        metadata.insert("user_id".into(), json!(request.user_id));
        metadata.insert("tags".into(), json!(tags));
        metadata.insert("streaming".into(), json!(request.streaming));
        metadata.insert("duration_ms".into(), json!(request.duration_ms));
        metadata.insert("traces_count".into(), json!(request.traces.len()));
        metadata.insert("project_name".into(), json!(self.project_name));
        metadata.insert("environment".into(), json!(self.environment));
        metadata.insert("trace_type".into(), json!("root_agent_trace"));

        RootTrace {
            id: trace_id,
            name: format!("agent_{}", request.agent_id),
            input: json!(request.input_text),
            output: json!(request.output_text),
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            tags,
            metadata,
        }
    }
}

/// The request's own trace id, or a name-based UUID over its content.
pub fn derive_trace_id(request: &RegistrationRequest) -> String {
    if let Some(id) = request.explicit_trace_id() {
        return id.to_string();
    }
    let content = serde_json::to_vec(request).unwrap_or_default();
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &content).to_string()
}

fn with_trace_index(mut obj: MappedObject, index: usize) -> MappedObject {
    obj.metadata.insert("trace_index".into(), json!(index));
    obj.children = obj
        .children
        .into_iter()
        .map(|child| with_trace_index(child, index))
        .collect();
    obj
}

fn processing_error(index: usize, raw: &Value, message: &str) -> MappedObject {
    MappedObject::new(ObjectKind::Event, format!("processing_error_{}", index))
        .with_level(Level::Error)
        .with_input(format!("Failed to process trace: {}", message))
        .with_output(raw.to_string())
        .with_meta("component", "trace_processor")
        .with_meta("error_message", message)
        .with_meta("trace_index", index)
        .with_meta("original_trace", raw.clone())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
