//! Core domain types and error definitions for tracelift.
//!
//! This crate provides the types shared across the service:
//!
//! - [`RawTraceEvent`] and [`TraceVariant`] - the agent runtime's trace events
//!   decoded into a closed union
//! - [`MappedObject`] and [`ObjectKind`] - normalized observability objects
//! - [`RegistrationRequest`] and [`RegistrationResult`] - one agent interaction
//!   in, one registration summary out
//! - [`Job`] and [`JobStatus`] - asynchronous job lifecycle records
//!
//! # Example
//!
//! ```rust
//! use tracelift_core::{RawTraceEvent, TraceVariant};
//!
//! let event = RawTraceEvent::from_value(&serde_json::json!({
//!     "trace": { "failureTrace": { "failureReason": "throttled" } },
//!     "eventTime": "2024-05-01T12:00:00Z"
//! }));
//!
//! assert_eq!(event.event_time.as_deref(), Some("2024-05-01T12:00:00Z"));
//! assert!(matches!(event.variants()[0], TraceVariant::Failure(_)));
//! ```

mod event;
mod job;
mod object;
mod request;

pub use event::{
    ActionGroupInput, ActionGroupInvocation, CodeInterpreterInput, CodeInterpreterInvocation,
    CodeInterpreterOutput, FailureTrace, GuardrailTrace, KnowledgeBaseLookupInput,
    KnowledgeBaseLookupOutput, Lenient, ModelInvocationInput, ModelInvocationOutput, Observation,
    OrchestrationTrace, ParsedResponse, ProcessingTrace, Rationale, RawResponse, RawTraceEvent,
    ReferenceContent, RetrievedReference, TokenUsage, TraceContent, TraceKind, TraceVariant,
};
pub use job::{Job, JobAccepted, JobProgress, JobStatus};
pub use object::{Level, MappedObject, ObjectCounts, ObjectKind, Usage};
pub use request::{RegistrationRequest, RegistrationResult};

use thiserror::Error;

/// A registration request was rejected before it reached the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required identity field was empty or whitespace.
    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    /// The body could not be decoded into a request.
    #[error("invalid request body: {0}")]
    Body(String),
}

/// A single trace section could not be decoded.
///
/// Never escapes the mapper; it is downgraded to a fallback object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// The section was present but did not have the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The event carried no `trace` object at all.
    #[error("trace content missing or not an object")]
    MissingContent,
}

impl From<serde_json::Error> for MappingError {
    fn from(err: serde_json::Error) -> Self {
        MappingError::Malformed(err.to_string())
    }
}

/// The tracing backend could not accept a batch.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The request to the backend failed before a response arrived.
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend accepted the batch but rejected some of its items.
    #[error("backend rejected {rejected} of {total} objects: {detail}")]
    Rejected {
        rejected: usize,
        total: usize,
        detail: String,
    },

    /// The sink refused the write outright.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}
