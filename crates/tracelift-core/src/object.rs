//! Normalized observability objects.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a mapped object. Determines the backend primitive that gets created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Generation,
    Tool,
    Retriever,
    Span,
    Guardrail,
    Event,
}

impl ObjectKind {
    pub const ALL: [ObjectKind; 6] = [
        ObjectKind::Generation,
        ObjectKind::Tool,
        ObjectKind::Retriever,
        ObjectKind::Span,
        ObjectKind::Guardrail,
        ObjectKind::Event,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Generation => "generation",
            ObjectKind::Tool => "tool",
            ObjectKind::Retriever => "retriever",
            ObjectKind::Span => "span",
            ObjectKind::Guardrail => "guardrail",
            ObjectKind::Event => "event",
        }
    }
}

/// Severity attached to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Default,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Default => "DEFAULT",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// Token usage of a model call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl Usage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input.saturating_add(output),
        }
    }
}

/// One typed observability unit, possibly with nested children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedObject {
    pub kind: ObjectKind,
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MappedObject>,
}

impl MappedObject {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            input: Value::Null,
            output: Value::Null,
            usage: None,
            level: None,
            metadata: Map::new(),
            model: None,
            children: Vec::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<Value>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Adds a metadata entry, replacing any previous value for `key`.
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Number of objects in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(MappedObject::count).sum::<usize>()
    }

    /// Adds this subtree to `counts`.
    pub fn tally(&self, counts: &mut ObjectCounts) {
        counts.record(self.kind);
        for child in &self.children {
            child.tally(counts);
        }
    }
}

/// Per-kind object totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub generations: usize,
    pub tools: usize,
    pub retrievers: usize,
    pub spans: usize,
    pub guardrails: usize,
    pub events: usize,
}

impl ObjectCounts {
    pub fn record(&mut self, kind: ObjectKind) {
        *self.slot(kind) += 1;
    }

    pub fn get(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Generation => self.generations,
            ObjectKind::Tool => self.tools,
            ObjectKind::Retriever => self.retrievers,
            ObjectKind::Span => self.spans,
            ObjectKind::Guardrail => self.guardrails,
            ObjectKind::Event => self.events,
        }
    }

    pub fn total(&self) -> usize {
        ObjectKind::ALL.iter().map(|k| self.get(*k)).sum()
    }

    fn slot(&mut self, kind: ObjectKind) -> &mut usize {
        match kind {
            ObjectKind::Generation => &mut self.generations,
            ObjectKind::Tool => &mut self.tools,
            ObjectKind::Retriever => &mut self.retrievers,
            ObjectKind::Span => &mut self.spans,
            ObjectKind::Guardrail => &mut self.guardrails,
            ObjectKind::Event => &mut self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_total() {
        let usage = Usage::new(120, 30);
        assert_eq!(usage.total, 150);
        assert_eq!(
            serde_json::to_value(usage).unwrap(),
            json!({ "input": 120, "output": 30, "total": 150 })
        );
    }

    #[test]
    fn test_count_and_tally_are_recursive() {
        let mut outer = MappedObject::new(ObjectKind::Span, "outer");
        outer.children.push(MappedObject::new(ObjectKind::Event, "inner"));

        let mut tree = MappedObject::new(ObjectKind::Generation, "agent_orchestration");
        tree.children.push(MappedObject::new(ObjectKind::Span, "agent_reasoning"));
        tree.children.push(outer);

        let mut counts = ObjectCounts::default();
        tree.tally(&mut counts);

        assert_eq!(tree.count(), 4);
        assert_eq!(counts.generations, 1);
        assert_eq!(counts.spans, 2);
        assert_eq!(counts.events, 1);
        assert_eq!(counts.total(), tree.count());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_value(Level::Warning).unwrap(), json!("WARNING"));
        assert_eq!(serde_json::to_value(ObjectKind::Retriever).unwrap(), json!("retriever"));
        assert_eq!(
            serde_json::to_value(ObjectCounts::default()).unwrap(),
            json!({
                "generations": 0, "tools": 0, "retrievers": 0,
                "spans": 0, "guardrails": 0, "events": 0
            })
        );
    }

    #[test]
    fn test_skips_empty_optionals() {
        let obj = MappedObject::new(ObjectKind::Event, "agent_failure").with_output("boom");
        let value = serde_json::to_value(&obj).unwrap();
        assert!(value.get("usage").is_none());
        assert!(value.get("children").is_none());
        assert_eq!(value["output"], json!("boom"));
    }
}
