use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentResult;

/// tool descriptor capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ReadsDb,
    ReadsLog,
    Pure,
}

/// One parameter of a tool's JSON-shaped input schema.
#[derive(Debug, Clone)]
pub struct ParameterSchema {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParameterSchema {
    pub fn required(name: &'static str, kind: ParameterKind) -> Self {
        Self { name, kind, default: None, enum_values: None }
    }

    pub fn optional(name: &'static str, kind: ParameterKind, default: Value) -> Self {
        Self { name, kind, default: Some(default), enum_values: None }
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

/// A typed, read-only capability invocable by a workflow via the tool
/// runtime: name, description, parameter schema, capability flags, and an
/// async `execute` taking a JSON argument object.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Vec<ParameterSchema>;
    fn capabilities(&self) -> HashSet<Capability>;

    /// Tool-specific deadline; the runtime additionally enforces an overall
    /// cap of 120s regardless of what a tool returns here.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, args: Value) -> AgentResult<Value>;
}
