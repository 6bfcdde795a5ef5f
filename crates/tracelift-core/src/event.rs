//! Raw trace events emitted by the agent runtime.
//!
//! Events arrive as loosely-shaped JSON. They are decoded here into a closed
//! union, one variant per trace tag, with every nested field optional. Any
//! section that does not fit its schema is kept as [`Lenient::Malformed`]
//! together with its raw payload so the mapper can still report it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::MappingError;

/// A value decoded with its raw JSON kept alongside.
#[derive(Debug, Clone)]
pub enum Lenient<T> {
    /// The payload matched the schema.
    Parsed { value: T, raw: Value },
    /// The payload was present but did not match the schema.
    Malformed { raw: Value, error: MappingError },
}

impl<T: DeserializeOwned> Lenient<T> {
    /// Decodes `raw`, keeping it regardless of the outcome.
    pub fn from_value(raw: Value) -> Self {
        let parsed = T::deserialize(&raw);
        match parsed {
            Ok(value) => Lenient::Parsed { value, raw },
            Err(e) => Lenient::Malformed {
                raw,
                error: e.into(),
            },
        }
    }
}

impl<T> Lenient<T> {
    /// The original JSON payload.
    pub fn raw(&self) -> &Value {
        match self {
            Lenient::Parsed { raw, .. } | Lenient::Malformed { raw, .. } => raw,
        }
    }

    /// The decoded value, or the reason it could not be decoded.
    pub fn parsed(&self) -> Result<&T, &MappingError> {
        match self {
            Lenient::Parsed { value, .. } => Ok(value),
            Lenient::Malformed { error, .. } => Err(error),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Lenient::from_value)
    }
}

impl<T> Serialize for Lenient<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw().serialize(serializer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trace tags
// ─────────────────────────────────────────────────────────────────────────────

/// The trace sections the runtime can emit, in mapping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceKind {
    Orchestration,
    PreProcessing,
    PostProcessing,
    Guardrail,
    Failure,
}

impl TraceKind {
    pub const ALL: [TraceKind; 5] = [
        TraceKind::Orchestration,
        TraceKind::PreProcessing,
        TraceKind::PostProcessing,
        TraceKind::Guardrail,
        TraceKind::Failure,
    ];

    /// The JSON key the runtime uses for this section.
    pub fn tag(self) -> &'static str {
        match self {
            TraceKind::Orchestration => "orchestrationTrace",
            TraceKind::PreProcessing => "preProcessingTrace",
            TraceKind::PostProcessing => "postProcessingTrace",
            TraceKind::Guardrail => "guardrailTrace",
            TraceKind::Failure => "failureTrace",
        }
    }
}

/// One decoded trace section.
#[derive(Debug, Clone)]
pub enum TraceVariant {
    Orchestration(Lenient<OrchestrationTrace>),
    PreProcessing(Lenient<ProcessingTrace>),
    PostProcessing(Lenient<ProcessingTrace>),
    Guardrail(Lenient<GuardrailTrace>),
    Failure(Lenient<FailureTrace>),
}

impl TraceVariant {
    fn decode(kind: TraceKind, raw: Value) -> Self {
        match kind {
            TraceKind::Orchestration => TraceVariant::Orchestration(Lenient::from_value(raw)),
            TraceKind::PreProcessing => TraceVariant::PreProcessing(Lenient::from_value(raw)),
            TraceKind::PostProcessing => TraceVariant::PostProcessing(Lenient::from_value(raw)),
            TraceKind::Guardrail => TraceVariant::Guardrail(Lenient::from_value(raw)),
            TraceKind::Failure => TraceVariant::Failure(Lenient::from_value(raw)),
        }
    }

    pub fn kind(&self) -> TraceKind {
        match self {
            TraceVariant::Orchestration(_) => TraceKind::Orchestration,
            TraceVariant::PreProcessing(_) => TraceKind::PreProcessing,
            TraceVariant::PostProcessing(_) => TraceKind::PostProcessing,
            TraceVariant::Guardrail(_) => TraceKind::Guardrail,
            TraceVariant::Failure(_) => TraceKind::Failure,
        }
    }
}

/// What an event's `trace` object turned out to contain.
#[derive(Debug, Clone)]
pub enum TraceContent {
    /// Known sections found under `trace`. Empty when only unknown tags were present.
    Sections(Vec<TraceVariant>),
    /// No `trace` object could be found.
    Unparseable { raw: Value, error: MappingError },
}

/// A single event from the runtime's trace stream.
#[derive(Debug, Clone)]
pub struct RawTraceEvent {
    pub content: TraceContent,
    pub event_time: Option<String>,
}

impl RawTraceEvent {
    /// Decodes an event. Total: every input produces an event.
    pub fn from_value(value: &Value) -> Self {
        let event_time = match value.get("eventTime") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        };

        let content = match value.get("trace") {
            Some(Value::Object(sections)) => TraceContent::Sections(
                TraceKind::ALL
                    .iter()
                    .filter_map(|kind| {
                        sections
                            .get(kind.tag())
                            .map(|raw| TraceVariant::decode(*kind, raw.clone()))
                    })
                    .collect(),
            ),
            _ => TraceContent::Unparseable {
                raw: value.clone(),
                error: MappingError::MissingContent,
            },
        };

        Self {
            content,
            event_time,
        }
    }

    /// Known sections of this event; empty for unparseable content.
    pub fn variants(&self) -> &[TraceVariant] {
        match &self.content {
            TraceContent::Sections(v) => v,
            TraceContent::Unparseable { .. } => &[],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestrationTrace {
    pub model_invocation_input: Option<Lenient<ModelInvocationInput>>,
    pub model_invocation_output: Option<Lenient<ModelInvocationOutput>>,
    pub rationale: Option<Lenient<Rationale>>,
    pub action_group_invocations: Vec<Lenient<ActionGroupInvocation>>,
    pub knowledge_base_lookup_input: Option<Lenient<KnowledgeBaseLookupInput>>,
    pub knowledge_base_lookup_output: Option<Lenient<KnowledgeBaseLookupOutput>>,
    pub code_interpreter_invocations: Vec<Lenient<CodeInterpreterInvocation>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInvocationInput {
    pub text: Option<String>,
    pub inference_configuration: Option<Value>,
    #[serde(rename = "type")]
    pub invocation_type: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInvocationOutput {
    pub raw_response: Option<RawResponse>,
    pub parsed_response: Option<ParsedResponse>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawResponse {
    /// Either a list of content blocks or a plain string.
    pub content: Option<Value>,
    pub usage: Option<TokenUsage>,
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParsedResponse {
    pub rationale: Option<String>,
    pub is_valid: Option<bool>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rationale {
    pub text: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionGroupInvocation {
    pub invocation_input: Option<ActionGroupInput>,
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionGroupInput {
    pub action_group_name: Option<String>,
    pub function: Option<String>,
    pub parameters: Option<Value>,
    pub trace_id: Option<String>,
}

/// Result of a tool call as reported back to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Observation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_group_invocation_output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_interpreter_invocation_output: Option<CodeInterpreterOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeBaseLookupInput {
    pub text: Option<String>,
    pub retrieval_filter: Option<Value>,
    pub knowledge_base_id: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeBaseLookupOutput {
    pub retrieved_references: Vec<RetrievedReference>,
    pub knowledge_base_id: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrievedReference {
    pub content: Option<ReferenceContent>,
    pub metadata: Option<Value>,
    pub location: Option<Value>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceContent {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeInterpreterInvocation {
    pub invocation_input: Option<CodeInterpreterInput>,
    pub observation: Option<Observation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeInterpreterInput {
    pub code: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeInterpreterOutput {
    pub execution_output: Option<Value>,
    pub files: Vec<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Pre/post processing, guardrails, failures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingTrace {
    pub model_invocation_input: Option<ModelInvocationInput>,
    pub model_invocation_output: Option<ModelInvocationOutput>,
}

impl ProcessingTrace {
    pub fn trace_id(&self) -> Option<&str> {
        self.model_invocation_input
            .as_ref()
            .and_then(|i| i.trace_id.as_deref())
            .or_else(|| {
                self.model_invocation_output
                    .as_ref()
                    .and_then(|o| o.trace_id.as_deref())
            })
    }

    pub fn parsed_response(&self) -> Option<&ParsedResponse> {
        self.model_invocation_output
            .as_ref()
            .and_then(|o| o.parsed_response.as_ref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardrailTrace {
    pub action: Option<String>,
    pub trace_id: Option<String>,
    pub outputs: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureTrace {
    pub failure_reason: Option<String>,
    pub trace_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_known_sections_in_table_order() {
        let event = RawTraceEvent::from_value(&json!({
            "trace": {
                "failureTrace": { "failureReason": "boom" },
                "guardrailTrace": { "action": "NONE" },
                "customTrace": { "anything": 1 }
            }
        }));

        let kinds: Vec<TraceKind> = event.variants().iter().map(|v| v.kind()).collect();
        assert_eq!(kinds, vec![TraceKind::Guardrail, TraceKind::Failure]);
        assert!(event.event_time.is_none());
    }

    #[test]
    fn test_unknown_tags_only_yield_no_sections() {
        let event = RawTraceEvent::from_value(&json!({ "trace": { "routingClassifierTrace": {} } }));
        assert!(matches!(event.content, TraceContent::Sections(ref v) if v.is_empty()));
    }

    #[test]
    fn test_missing_trace_object_is_unparseable() {
        for value in [json!({}), json!("just a string"), json!({ "trace": [1, 2] })] {
            let event = RawTraceEvent::from_value(&value);
            assert!(matches!(
                event.content,
                TraceContent::Unparseable {
                    error: MappingError::MissingContent,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_malformed_sibling_does_not_poison_the_rest() {
        let orch: Lenient<OrchestrationTrace> = Lenient::from_value(json!({
            "actionGroupInvocations": [
                { "invocationInput": { "actionGroupName": "weather", "function": "get" } },
                { "invocationInput": "not an object" }
            ],
            "rationale": { "text": "thinking" }
        }));

        let orch = orch.parsed().expect("outer shape is valid");
        assert_eq!(orch.action_group_invocations.len(), 2);
        assert!(orch.action_group_invocations[0].parsed().is_ok());
        assert!(orch.action_group_invocations[1].parsed().is_err());
        assert_eq!(
            orch.action_group_invocations[1].raw(),
            &json!({ "invocationInput": "not an object" })
        );
    }

    #[test]
    fn test_non_string_event_time_is_rendered() {
        let event = RawTraceEvent::from_value(&json!({ "trace": {}, "eventTime": 1714564800 }));
        assert_eq!(event.event_time.as_deref(), Some("1714564800"));
    }

    #[test]
    fn test_observation_keeps_unknown_keys() {
        let obs: Observation = serde_json::from_value(json!({
            "type": "KNOWLEDGE_BASE",
            "traceId": "t-1"
        }))
        .unwrap();
        assert_eq!(obs.trace_id.as_deref(), Some("t-1"));
        assert_eq!(obs.other.get("type"), Some(&json!("KNOWLEDGE_BASE")));
        assert_eq!(
            serde_json::to_value(&obs).unwrap(),
            json!({ "traceId": "t-1", "type": "KNOWLEDGE_BASE" })
        );
    }
}
