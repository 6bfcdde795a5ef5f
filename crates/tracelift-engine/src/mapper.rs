//! Raw trace event to mapped object conversion.
//!
//! Total over every input: a section that cannot be decoded becomes a single
//! WARNING fallback event and its siblings are still mapped. Empty sections
//! and elements carry nothing and map to nothing.

use serde_json::{json, Map, Value};
use tracing::warn;

use tracelift_core::{
    ActionGroupInvocation, CodeInterpreterInvocation, FailureTrace, GuardrailTrace,
    KnowledgeBaseLookupInput, KnowledgeBaseLookupOutput, Lenient, Level, MappedObject,
    MappingError, ModelInvocationInput, ModelInvocationOutput, ObjectKind, OrchestrationTrace,
    ProcessingTrace, Rationale, RawTraceEvent, TraceContent, TraceVariant, Usage,
};

pub const GENERATION_NAME: &str = "agent_orchestration";
pub const REASONING_NAME: &str = "agent_reasoning";
pub const RETRIEVER_NAME: &str = "knowledge_base_lookup";
pub const CODE_INTERPRETER_NAME: &str = "code_interpreter";
pub const FAILURE_NAME: &str = "agent_failure";
pub const DEFAULT_MODEL: &str = "agent-model";

const NO_INPUT: &str = "No input captured";
const NO_OUTPUT: &str = "No output captured";

/// Maps one raw JSON event.
pub fn map_value(value: &Value) -> Vec<MappedObject> {
    map_event(&RawTraceEvent::from_value(value))
}

/// Maps one decoded event into zero or more objects.
pub fn map_event(event: &RawTraceEvent) -> Vec<MappedObject> {
    let ctx = Ctx {
        event_time: event.event_time.as_deref(),
    };

    match &event.content {
        TraceContent::Unparseable { raw, error } => vec![ctx.fallback("trace", None, raw, error)],
        TraceContent::Sections(variants) => variants
            .iter()
            .flat_map(|variant| ctx.map_variant(variant))
            .collect(),
    }
}

/// Per-event context stamped onto every object.
struct Ctx<'a> {
    event_time: Option<&'a str>,
}

impl Ctx<'_> {
    fn map_variant(&self, variant: &TraceVariant) -> Vec<MappedObject> {
        let tag = variant.kind().tag();
        match variant {
            TraceVariant::Orchestration(section) => self.section(tag, section, |o| self.orchestration(o)),
            TraceVariant::PreProcessing(section) => {
                self.section(tag, section, |p| vec![self.preprocessing(p, section.raw())])
            }
            TraceVariant::PostProcessing(section) => {
                self.section(tag, section, |p| vec![self.postprocessing(p, section.raw())])
            }
            TraceVariant::Guardrail(section) => {
                self.section(tag, section, |g| vec![self.guardrail(g, section.raw())])
            }
            TraceVariant::Failure(section) => {
                self.section(tag, section, |f| vec![self.failure(f, section.raw())])
            }
        }
    }

    fn section<T, F>(&self, tag: &str, section: &Lenient<T>, map: F) -> Vec<MappedObject>
    where
        F: FnOnce(&T) -> Vec<MappedObject>,
    {
        if is_blank(section.raw()) {
            return Vec::new();
        }
        match section.parsed() {
            Ok(value) => map(value),
            Err(error) => vec![self.fallback(tag, None, section.raw(), error)],
        }
    }

    fn stamp(
        &self,
        obj: MappedObject,
        component: &str,
        trace_id: Option<&str>,
    ) -> MappedObject {
        obj.with_meta("component", component)
            .with_meta("trace_id", trace_id)
            .with_meta("event_time", self.event_time)
    }

    fn fallback(
        &self,
        tag: &str,
        element: Option<&str>,
        raw: &Value,
        error: &MappingError,
    ) -> MappedObject {
        warn!(tag, element = ?element, error = %error, "Falling back for unmappable trace section");

        MappedObject::new(ObjectKind::Event, format!("unmapped_{}", tag))
            .with_level(Level::Warning)
            .with_input(format!("Failed to map {}: {}", tag, error))
            .with_output(raw.to_string())
            .with_meta("component", "mapper_fallback")
            .with_meta("original_trace_type", tag)
            .with_meta("element", element)
            .with_meta("mapping_error", error.to_string())
            .with_meta("raw_payload", raw.clone())
            .with_meta("event_time", self.event_time)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Orchestration
    // ─────────────────────────────────────────────────────────────────────────

    fn orchestration(&self, trace: &OrchestrationTrace) -> Vec<MappedObject> {
        const TAG: &str = "orchestrationTrace";
        let mut objects = Vec::new();

        let model_input = present(trace.model_invocation_input.as_ref());
        let model_output = present(trace.model_invocation_output.as_ref());
        let input = self.salvage(TAG, "modelInvocationInput", model_input, &mut objects);
        let output = self.salvage(TAG, "modelInvocationOutput", model_output, &mut objects);
        let mut generation = (input.is_some() || output.is_some())
            .then(|| self.generation(input, output, model_input, model_output));

        if let Some(rationale) = present(trace.rationale.as_ref()) {
            let span = match rationale.parsed() {
                Ok(r) => self.rationale(r, rationale.raw()),
                Err(e) => self.fallback(TAG, Some("rationale"), rationale.raw(), e),
            };
            match generation.as_mut() {
                Some(parent) => parent.children.push(span),
                None => objects.push(span),
            }
        }

        if let Some(generation) = generation {
            objects.insert(0, generation);
        }

        for (i, action) in trace
            .action_group_invocations
            .iter()
            .enumerate()
            .filter(|(_, a)| !is_blank(a.raw()))
        {
            objects.push(match action.parsed() {
                Ok(a) => self.action_group(a, action.raw()),
                Err(e) => {
                    let element = format!("actionGroupInvocations[{}]", i);
                    self.fallback(TAG, Some(element.as_str()), action.raw(), e)
                }
            });
        }

        let kb_input = present(trace.knowledge_base_lookup_input.as_ref());
        let kb_output = present(trace.knowledge_base_lookup_output.as_ref());
        let lookup = self.salvage(TAG, "knowledgeBaseLookupInput", kb_input, &mut objects);
        let results = self.salvage(TAG, "knowledgeBaseLookupOutput", kb_output, &mut objects);
        if lookup.is_some() || results.is_some() {
            objects.push(self.retriever(lookup, results, kb_input, kb_output));
        }

        for (i, call) in trace
            .code_interpreter_invocations
            .iter()
            .enumerate()
            .filter(|(_, c)| !is_blank(c.raw()))
        {
            objects.push(match call.parsed() {
                Ok(c) => self.code_interpreter(c, call.raw()),
                Err(e) => {
                    let element = format!("codeInterpreterInvocations[{}]", i);
                    self.fallback(TAG, Some(element.as_str()), call.raw(), e)
                }
            });
        }

        objects
    }

    /// Parsed payload of an optional element. A malformed one is replaced by
    /// a fallback pushed onto `objects`.
    fn salvage<'s, T>(
        &self,
        tag: &str,
        element: &str,
        section: Option<&'s Lenient<T>>,
        objects: &mut Vec<MappedObject>,
    ) -> Option<&'s T> {
        match transpose(section) {
            Ok(parsed) => parsed,
            Err((raw, error)) => {
                objects.push(self.fallback(tag, Some(element), raw, error));
                None
            }
        }
    }

    fn generation(
        &self,
        input: Option<&ModelInvocationInput>,
        output: Option<&ModelInvocationOutput>,
        raw_input: Option<&Lenient<ModelInvocationInput>>,
        raw_output: Option<&Lenient<ModelInvocationOutput>>,
    ) -> MappedObject {
        let prompt = input
            .and_then(|i| non_empty(i.text.as_deref()).map(str::to_string))
            .or_else(|| {
                input
                    .and_then(|i| i.inference_configuration.as_ref())
                    .map(render)
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| NO_INPUT.to_string());

        let raw_response = output.and_then(|o| o.raw_response.as_ref());
        let completion = raw_response
            .and_then(|r| r.content.as_ref())
            .map(first_text)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_OUTPUT.to_string());
        let model = raw_response
            .and_then(|r| non_empty(r.model_id.as_deref()))
            .unwrap_or(DEFAULT_MODEL);

        let trace_id = input
            .and_then(|i| i.trace_id.as_deref())
            .or_else(|| output.and_then(|o| o.trace_id.as_deref()));

        let mut generation = MappedObject::new(ObjectKind::Generation, GENERATION_NAME)
            .with_input(prompt)
            .with_output(completion)
            .with_model(model);

        if let Some(usage) = raw_response.and_then(|r| r.usage) {
            generation = generation.with_usage(Usage::new(usage.input_tokens, usage.output_tokens));
        }

        self.stamp(generation, "orchestration", trace_id)
            .with_meta("raw_model_input", raw_of(raw_input))
            .with_meta("raw_model_output", raw_of(raw_output))
    }

    fn rationale(&self, rationale: &Rationale, raw: &Value) -> MappedObject {
        let span = MappedObject::new(ObjectKind::Span, REASONING_NAME)
            .with_input(rationale.text.clone().unwrap_or_default());
        self.stamp(span, "reasoning", rationale.trace_id.as_deref())
            .with_meta("raw_rationale", raw.clone())
    }

    fn action_group(&self, action: &ActionGroupInvocation, raw: &Value) -> MappedObject {
        let input = action.invocation_input.as_ref();
        let group = input
            .and_then(|i| non_empty(i.action_group_name.as_deref()))
            .unwrap_or("unknown_action");
        let function = input
            .and_then(|i| non_empty(i.function.as_deref()))
            .unwrap_or("unknown_function");
        let parameters = input
            .and_then(|i| i.parameters.clone())
            .unwrap_or_else(|| json!({}));

        let output = match &action.observation {
            Some(obs) => obs
                .action_group_invocation_output
                .clone()
                .or_else(|| obs.final_response.clone())
                .unwrap_or_else(|| serde_json::to_value(obs).unwrap_or_else(|_| json!({}))),
            None => json!({}),
        };

        let trace_id = input
            .and_then(|i| i.trace_id.as_deref())
            .or_else(|| action.observation.as_ref().and_then(|o| o.trace_id.as_deref()));

        let tool = MappedObject::new(ObjectKind::Tool, format!("{}.{}", group, function))
            .with_input(json!({ "function": function, "parameters": parameters }))
            .with_output(output);

        self.stamp(tool, "action_group", trace_id)
            .with_meta("action_group_name", group)
            .with_meta("function_name", function)
            .with_meta("raw_action", raw.clone())
    }

    fn retriever(
        &self,
        input: Option<&KnowledgeBaseLookupInput>,
        output: Option<&KnowledgeBaseLookupOutput>,
        raw_input: Option<&Lenient<KnowledgeBaseLookupInput>>,
        raw_output: Option<&Lenient<KnowledgeBaseLookupOutput>>,
    ) -> MappedObject {
        let query = input
            .and_then(|i| non_empty(i.text.as_deref()).map(str::to_string))
            .or_else(|| input.and_then(|i| i.retrieval_filter.as_ref()).map(render))
            .unwrap_or_default();

        let results: Vec<Value> = output
            .map(|o| o.retrieved_references.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|r| {
                json!({
                    "content": r.content.as_ref().and_then(|c| c.text.clone()).unwrap_or_default(),
                    "metadata": r.metadata.clone().unwrap_or_else(|| json!({})),
                    "location": r.location.clone().unwrap_or_else(|| json!({})),
                    "score": r.score,
                })
            })
            .collect();
        let count = results.len();

        let kb_id = input
            .and_then(|i| i.knowledge_base_id.as_deref())
            .or_else(|| output.and_then(|o| o.knowledge_base_id.as_deref()));
        let trace_id = input
            .and_then(|i| i.trace_id.as_deref())
            .or_else(|| output.and_then(|o| o.trace_id.as_deref()));

        let retriever = MappedObject::new(ObjectKind::Retriever, RETRIEVER_NAME)
            .with_input(query)
            .with_output(Value::Array(results));

        self.stamp(retriever, "knowledge_base", trace_id)
            .with_meta("knowledge_base_id", kb_id)
            .with_meta("retrieval_results_count", count)
            .with_meta("raw_kb_input", raw_of(raw_input))
            .with_meta("raw_kb_output", raw_of(raw_output))
    }

    fn code_interpreter(&self, call: &CodeInterpreterInvocation, raw: &Value) -> MappedObject {
        let input = call.invocation_input.as_ref();
        let code = input.and_then(|i| i.code.clone()).unwrap_or_default();
        let result = call
            .observation
            .as_ref()
            .and_then(|o| o.code_interpreter_invocation_output.as_ref());

        let execution_output = result
            .and_then(|r| r.execution_output.clone())
            .unwrap_or_else(|| json!(""));
        let files = result.map(|r| r.files.clone()).unwrap_or_default();

        let trace_id = input
            .and_then(|i| i.trace_id.as_deref())
            .or_else(|| call.observation.as_ref().and_then(|o| o.trace_id.as_deref()));

        let tool = MappedObject::new(ObjectKind::Tool, CODE_INTERPRETER_NAME)
            .with_input(json!({ "code": code }))
            .with_output(json!({
                "execution_output": execution_output,
                "files_created": files,
            }));

        self.stamp(tool, "code_interpreter", trace_id)
            .with_meta("raw_code_data", raw.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pre/post processing, guardrails, failures
    // ─────────────────────────────────────────────────────────────────────────

    fn preprocessing(&self, trace: &ProcessingTrace, raw: &Value) -> MappedObject {
        let parsed = trace.parsed_response();
        let span = MappedObject::new(ObjectKind::Span, "input_preprocessing")
            .with_input(invocation_text(trace))
            .with_output(parsed.and_then(|p| p.rationale.clone()).unwrap_or_default());

        self.stamp(span, "preprocessing", trace.trace_id())
            .with_meta("is_valid", parsed.and_then(|p| p.is_valid).unwrap_or(true))
            .with_meta("raw_preprocessing", raw.clone())
    }

    fn postprocessing(&self, trace: &ProcessingTrace, raw: &Value) -> MappedObject {
        let span = MappedObject::new(ObjectKind::Span, "output_postprocessing")
            .with_input(invocation_text(trace))
            .with_output(
                trace
                    .parsed_response()
                    .and_then(|p| p.text.clone())
                    .unwrap_or_default(),
            );

        self.stamp(span, "postprocessing", trace.trace_id())
            .with_meta("raw_postprocessing", raw.clone())
    }

    fn guardrail(&self, trace: &GuardrailTrace, raw: &Value) -> MappedObject {
        let action = non_empty(trace.action.as_deref()).unwrap_or("NONE");
        let trace_id = trace.trace_id.as_deref().unwrap_or_default();
        // Direction is inferred from the runtime's trace id naming.
        let name = if trace_id.to_lowercase().contains("pre") {
            "input_guardrail"
        } else {
            "output_guardrail"
        };
        let blocked = matches!(action, "BLOCKED" | "INTERVENED");

        let guardrail = MappedObject::new(ObjectKind::Guardrail, name)
            .with_input("")
            .with_output(json!({
                "action": action,
                "outputs": trace.outputs,
                "blocked": blocked,
            }));

        self.stamp(guardrail, "guardrail", Some(trace_id))
            .with_meta("guardrail_action", action)
            .with_meta("raw_guardrail", raw.clone())
    }

    fn failure(&self, trace: &FailureTrace, raw: &Value) -> MappedObject {
        let reason = non_empty(trace.failure_reason.as_deref()).unwrap_or("Unknown failure");

        let event = MappedObject::new(ObjectKind::Event, FAILURE_NAME)
            .with_level(Level::Error)
            .with_input("")
            .with_output(reason);

        self.stamp(event, "failure", trace.trace_id.as_deref())
            .with_meta("failure_reason", reason)
            .with_meta("raw_failure", raw.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

type Broken<'a> = (&'a Value, &'a MappingError);

/// `None` stays `None`; a malformed payload surfaces as `Err`.
fn transpose<T>(section: Option<&Lenient<T>>) -> Result<Option<&T>, Broken<'_>> {
    match section {
        None => Ok(None),
        Some(Lenient::Parsed { value, .. }) => Ok(Some(value)),
        Some(Lenient::Malformed { raw, error }) => Err((raw, error)),
    }
}

/// Drops elements whose payload is `null` or `{}`.
fn present<T>(section: Option<&Lenient<T>>) -> Option<&Lenient<T>> {
    section.filter(|s| !is_blank(s.raw()))
}

fn is_blank(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn raw_of<T>(section: Option<&Lenient<T>>) -> Value {
    section.map(|s| s.raw().clone()).unwrap_or(Value::Null)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Renders a JSON value as text; strings are taken verbatim.
fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First text block of a response body, or the body itself as text.
fn first_text(content: &Value) -> String {
    match content {
        Value::Array(blocks) => match blocks.first() {
            Some(Value::Object(block)) => block_text(block),
            Some(other) => render(other),
            None => String::new(),
        },
        other => render(other),
    }
}

fn block_text(block: &Map<String, Value>) -> String {
    block.get("text").map(render).unwrap_or_default()
}

fn invocation_text(trace: &ProcessingTrace) -> String {
    trace
        .model_invocation_input
        .as_ref()
        .and_then(|i| i.text.clone())
        .unwrap_or_default()
}
