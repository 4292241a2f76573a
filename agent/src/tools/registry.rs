use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::guardrails;
use crate::telemetry::{InvocationOutcome, TelemetrySink, ToolInvocationRecord};

use super::base::{Capability, ParameterKind, Tool};

const OVERALL_DEADLINE_CAP: std::time::Duration = std::time::Duration::from_secs(120);
const RESULT_BYTE_CAP: usize = 64 * 1024;

/// Built once at startup as a single owning struct and read-only
/// thereafter.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    sink: TelemetrySink,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub value: Value,
    pub truncated: bool,
}

impl ToolRegistry {
    pub fn new(sink: TelemetrySink) -> Self {
        Self { tools: HashMap::new(), sink }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_some() {
            panic!("duplicate tool registration for {name}");
        }
    }

    pub fn describe_all(&self) -> Vec<(&'static str, &'static str)> {
        self.tools.values().map(|t| (t.name(), t.description())).collect()
    }

    /// The dispatch pipeline: validate → guardrail → record →
    /// deadline-bound invoke → cap → finalize.
    pub async fn dispatch(&self, name: &str, raw_args: Value, parent: Option<Uuid>, root_invocation_id: Uuid) -> AgentResult<DispatchOutcome> {
        let tool = self.tools.get(name).ok_or_else(|| AgentError::UnknownTool(name.to_string()))?.clone();

        let validated = match validate_args(tool.as_ref(), raw_args) {
            Ok(v) => v,
            Err(e) => {
                self.finalize(name, Value::Null, parent, Utc::now(), InvocationOutcome::FailedWithKind, 0).await;
                return Err(e);
            }
        };

        if tool.capabilities().contains(&Capability::ReadsDb) {
            if let Err(e) = apply_input_guardrail(&validated) {
                self.finalize(name, validated.clone(), parent, Utc::now(), InvocationOutcome::GuardrailRejected, 0).await;
                let _ = root_invocation_id;
                return Err(e);
            }
        }

        let started_at = Utc::now();
        let deadline = tool.timeout().min(OVERALL_DEADLINE_CAP);

        let outcome = tokio::time::timeout(deadline, tool.execute(validated.clone())).await;

        match outcome {
            Err(_) => {
                self.finalize(name, validated, parent, started_at, InvocationOutcome::Timeout, 0).await;
                Err(AgentError::Timeout(deadline))
            }
            Ok(Err(e)) => {
                self.finalize(name, validated, parent, started_at, InvocationOutcome::FailedWithKind, 0).await;
                Err(e)
            }
            Ok(Ok(value)) => {
                let (capped, truncated) = cap_result(value);
                let bytes = serde_json::to_vec(&capped).map(|v| v.len() as u64).unwrap_or(0);
                self.finalize(name, validated, parent, started_at, InvocationOutcome::Ok, bytes).await;
                Ok(DispatchOutcome { value: capped, truncated })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        tool_name: &str,
        normalized_arguments: Value,
        parent: Option<Uuid>,
        started_at: chrono::DateTime<Utc>,
        outcome: InvocationOutcome,
        result_bytes: u64,
    ) {
        let record = ToolInvocationRecord {
            id: Uuid::new_v4(),
            parent,
            tool_name: tool_name.to_string(),
            normalized_arguments,
            started_at,
            ended_at: Utc::now(),
            outcome,
            result_bytes,
        };
        self.sink.append_invocation(record).await;
    }
}

fn apply_input_guardrail(args: &Value) -> AgentResult<()> {
    if let Value::Object(map) = args {
        for value in map.values() {
            if let Value::String(s) = value {
                guardrails::check_input(s)?;
            }
        }
    }
    Ok(())
}

/// Coerces types, applies defaults, rejects unknown keys, rejects missing
/// required keys.
fn validate_args(tool: &dyn Tool, raw: Value) -> AgentResult<Value> {
    let schema = tool.parameters();
    let mut input = match raw {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => return Err(AgentError::bad_args(format!("expected a JSON object, got {other}"))),
    };

    let known: std::collections::HashSet<&str> = schema.iter().map(|p| p.name).collect();
    for key in input.keys() {
        if !known.contains(key.as_str()) {
            return Err(AgentError::bad_args(format!("unknown argument: {key}")));
        }
    }

    let mut out = serde_json::Map::new();
    for param in &schema {
        let value = match input.remove(param.name) {
            Some(v) => coerce(param, v)?,
            None => match &param.default {
                Some(d) => d.clone(),
                None => return Err(AgentError::bad_args(format!("missing required argument: {}", param.name))),
            },
        };

        if let Some(allowed) = &param.enum_values {
            if !allowed.contains(&value) {
                return Err(AgentError::bad_args(format!("{} must be one of {:?}", param.name, allowed)));
            }
        }

        out.insert(param.name.to_string(), value);
    }

    Ok(Value::Object(out))
}

fn coerce(param: &super::base::ParameterSchema, value: Value) -> AgentResult<Value> {
    match (param.kind, &value) {
        (ParameterKind::String, Value::String(_)) => Ok(value),
        (ParameterKind::Boolean, Value::Bool(_)) => Ok(value),
        (ParameterKind::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value),
        (ParameterKind::Number, Value::Number(_)) => Ok(value),
        (ParameterKind::Integer, Value::String(s)) => s
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| AgentError::bad_args(format!("{} is not an integer", param.name))),
        (ParameterKind::Number, Value::String(s)) => s
            .parse::<f64>()
            .map(|f| serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
            .map_err(|_| AgentError::bad_args(format!("{} is not a number", param.name))),
        _ => Err(AgentError::bad_args(format!("{} has the wrong type", param.name))),
    }
}

/// Caps the serialized result at 64 KiB, truncating and marking it if it
/// overflows.
fn cap_result(value: Value) -> (Value, bool) {
    let serialized = serde_json::to_string(&value).unwrap_or_default();
    if serialized.len() <= RESULT_BYTE_CAP {
        return (value, false);
    }

    let mut boundary = RESULT_BYTE_CAP;
    while boundary > 0 && !serialized.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let mut truncated_text = serialized;
    truncated_text.truncate(boundary);
    let truncated_value = serde_json::json!({
        "truncated": true,
        "partial": truncated_text,
    });
    (truncated_value, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::base::{Capability, ParameterSchema, Tool};
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes its input"
        }
        fn parameters(&self) -> Vec<ParameterSchema> {
            vec![ParameterSchema::required("text", ParameterKind::String)]
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::from([Capability::Pure])
        }
        async fn execute(&self, args: Value) -> AgentResult<Value> {
            Ok(args)
        }
    }

    struct DbTool;

    #[async_trait]
    impl Tool for DbTool {
        fn name(&self) -> &'static str {
            "db_tool"
        }
        fn description(&self) -> &'static str {
            "reads the db"
        }
        fn parameters(&self) -> Vec<ParameterSchema> {
            vec![ParameterSchema::required("sql", ParameterKind::String)]
        }
        fn capabilities(&self) -> HashSet<Capability> {
            HashSet::from([Capability::ReadsDb])
        }
        async fn execute(&self, args: Value) -> AgentResult<Value> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails() {
        let registry = ToolRegistry::new(TelemetrySink::new());
        let err = registry.dispatch("nope", Value::Null, None, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownTool);
    }

    #[tokio::test]
    async fn missing_required_arg_is_bad_args() {
        let mut registry = ToolRegistry::new(TelemetrySink::new());
        registry.register(Arc::new(EchoTool));
        let err = registry.dispatch("echo", serde_json::json!({}), None, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadArgs);
    }

    #[tokio::test]
    async fn unknown_key_is_bad_args() {
        let mut registry = ToolRegistry::new(TelemetrySink::new());
        registry.register(Arc::new(EchoTool));
        let err = registry
            .dispatch("echo", serde_json::json!({"text": "hi", "extra": 1}), None, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadArgs);
    }

    #[tokio::test]
    async fn reads_db_tool_rejects_ddl_input() {
        let mut registry = ToolRegistry::new(TelemetrySink::new());
        registry.register(Arc::new(DbTool));
        let err = registry
            .dispatch("db_tool", serde_json::json!({"sql": "DROP TABLE users"}), None, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputBlocked);
    }

    #[tokio::test]
    async fn happy_path_round_trips_and_records_invocation() {
        let sink = TelemetrySink::new();
        let mut registry = ToolRegistry::new(sink.clone());
        registry.register(Arc::new(EchoTool));
        let root = Uuid::new_v4();
        let out = registry.dispatch("echo", serde_json::json!({"text": "hi"}), None, root).await.unwrap();
        assert_eq!(out.value["text"], "hi");
        assert!(!out.truncated);
        assert_eq!(sink.invocation_snapshot().await.len(), 1);
    }
}
