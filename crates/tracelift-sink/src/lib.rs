//! Delivery of trace hierarchies to a tracing backend.
//!
//! A [`TraceSink`] accepts individual backend objects and guarantees they are
//! delivered once [`TraceSink::flush`] returns. [`RegistrationClient`] walks a
//! [`tracelift_engine::Hierarchy`] and pushes it through a sink.

mod client;
mod langfuse;
mod memory;

pub use client::RegistrationClient;
pub use langfuse::LangfuseSink;
pub use memory::InMemorySink;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use tracelift_core::{Level, MappedObject, ObjectKind, TransportError, Usage};
use tracelift_engine::RootTrace;

/// Backend primitive an object is created as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Trace,
    Span,
    Generation,
    Event,
}

impl Primitive {
    /// Generations and events have their own primitive; everything else is a span.
    pub fn for_kind(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Generation => Primitive::Generation,
            ObjectKind::Event => Primitive::Event,
            ObjectKind::Tool | ObjectKind::Retriever | ObjectKind::Span | ObjectKind::Guardrail => {
                Primitive::Span
            }
        }
    }
}

/// One object as handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkObject {
    pub primitive: Primitive,
    pub id: String,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub input: Value,
    pub output: Value,
    pub metadata: Map<String, Value>,
    pub level: Option<Level>,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub tags: Vec<String>,
}

impl SinkObject {
    pub fn root(root: &RootTrace) -> Self {
        Self {
            primitive: Primitive::Trace,
            id: root.id.clone(),
            trace_id: root.id.clone(),
            parent_id: None,
            name: root.name.clone(),
            input: root.input.clone(),
            output: root.output.clone(),
            metadata: root.metadata.clone(),
            level: None,
            model: None,
            usage: None,
            session_id: Some(root.session_id.clone()),
            user_id: Some(root.user_id.clone()),
            tags: root.tags.clone(),
        }
    }

    /// Converts a mapped node, tagging its metadata with the object type.
    pub fn node(
        node: &MappedObject,
        id: String,
        trace_id: &str,
        parent_id: Option<&str>,
    ) -> Self {
        let kind = node.kind.as_str();
        let mut metadata = node.metadata.clone();
        metadata.insert("type".into(), Value::from(kind));
        metadata.insert("langfuse_object_type".into(), Value::from(kind));
        if node.kind == ObjectKind::Event {
            let level = node.level.unwrap_or(Level::Default);
            metadata.insert("level".into(), Value::from(level.as_str()));
        }

        Self {
            primitive: Primitive::for_kind(node.kind),
            id,
            trace_id: trace_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            name: node.name.clone(),
            input: node.input.clone(),
            output: node.output.clone(),
            metadata,
            level: node.level,
            model: node.model.clone(),
            usage: node.usage,
            session_id: None,
            user_id: None,
            tags: Vec::new(),
        }
    }
}

/// Destination for backend objects. Implementations accept concurrent writers.
#[async_trait]
pub trait TraceSink: Send + Sync {
    async fn create(&self, object: SinkObject) -> Result<(), TransportError>;

    /// Delivers everything created for `trace_id` so far.
    async fn flush(&self, trace_id: &str) -> Result<(), TransportError>;
}
