//! Trace normalization for tracelift.
//!
//! [`map_event`] turns one raw runtime event into typed objects;
//! [`HierarchyBuilder`] places the objects of a whole request under a single
//! root trace and tallies them.

mod hierarchy;
mod mapper;

pub use hierarchy::{derive_trace_id, Hierarchy, HierarchyBuilder, MapFn, RootTrace};
pub use mapper::{
    map_event, map_value, CODE_INTERPRETER_NAME, DEFAULT_MODEL, FAILURE_NAME,
    GENERATION_NAME, REASONING_NAME, RETRIEVER_NAME,
};
