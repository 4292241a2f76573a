//! Registers typed capabilities and dispatches calls by
//! name with validated arguments, guardrails, deadlines, and result caps.

mod base;
mod catalog;
mod registry;

pub use base::{Capability, ParameterKind, ParameterSchema, Tool};
pub use catalog::{
    ExternalMetricsTool, ExtractPatternsTool, FetchRemoteLogTool, RunReadonlyProbeTool, RunReadonlyQueryTool,
    ServerCapabilitiesTool, TailLocalLogTool,
};
pub use registry::{DispatchOutcome, ToolRegistry};
