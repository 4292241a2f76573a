use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{self};
use crate::error::ErrorKind;
use crate::report::{AgentReport, Finding};
use crate::telemetry::{InvocationOutcome, ToolInvocationRecord};

use super::{Workflow, WorkflowContext};

pub const WORKFLOW_NAME: &str = "db-inspector";

#[derive(Debug, Clone, Deserialize)]
pub struct DbInspectorParams {
    pub sql: String,
    #[serde(default = "default_row_cap")]
    pub row_cap: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_row_cap() -> u32 {
    db::DEFAULT_ROW_CAP
}

fn default_timeout_secs() -> u64 {
    10
}

/// the workflow other workflows' textual recommendations
/// ("check `information_schema.processlist`") can be followed up on
/// mechanically.
pub struct DbInspectorWorkflow;

#[async_trait]
impl Workflow for DbInspectorWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW_NAME
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> AgentReport {
        let params: DbInspectorParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return AgentReport::partial_error(WORKFLOW_NAME, "parameters", e.to_string()),
        };

        // Validated up front, outside tool dispatch, so an unsafe shape
        // never borrows a connection.
        if let Err(e) = db::validate_query_shape(&params.sql) {
            ctx.telemetry
                .append_invocation(ToolInvocationRecord {
                    id: Uuid::new_v4(),
                    parent: None,
                    tool_name: "run_readonly_query".to_string(),
                    normalized_arguments: json!({ "sql": params.sql }),
                    started_at: Utc::now(),
                    ended_at: Utc::now(),
                    outcome: InvocationOutcome::FailedWithKind,
                    result_bytes: 0,
                })
                .await;
            debug_assert_eq!(e.kind(), ErrorKind::UnsafeQuery);
            return super::tool_error_report(WORKFLOW_NAME, "run_readonly_query", e);
        }

        let call = ctx
            .call_tool(
                "run_readonly_query",
                json!({ "sql": params.sql, "row_cap": params.row_cap, "timeout_secs": params.timeout_secs }),
            )
            .await;

        let result = match call {
            Ok(v) => v,
            Err(e) => return super::tool_error_report(WORKFLOW_NAME, "run_readonly_query", e),
        };

        let columns: Vec<String> = result["columns"].as_array().map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect()).unwrap_or_default();
        let rows = result["rows"].as_array().cloned().unwrap_or_default();
        let row_count = result["row_count"].as_u64().unwrap_or(0);
        let truncated = result["truncated"].as_bool().unwrap_or(false);

        let table = render_table(&columns, &rows);
        let context_paragraph = describe_result(&columns, row_count, truncated);

        let markdown = format!("## Query result\n\n{table}\n\n{context_paragraph}");

        let finding = Finding {
            title: format!("{row_count} row(s) returned"),
            indicators: vec![format!("columns: {}", columns.join(", "))],
            suggested_actions: Vec::new(),
        };

        AgentReport::complete(WORKFLOW_NAME, "info", vec![finding], markdown)
    }
}

fn render_table(columns: &[String], rows: &[Value]) -> String {
    if columns.is_empty() {
        return "_(no columns returned)_".to_string();
    }
    let header = format!("| {} |", columns.join(" | "));
    let sep = format!("|{}|", columns.iter().map(|_| "---").collect::<Vec<_>>().join("|"));
    let mut lines = vec![header, sep];
    for row in rows {
        if let Some(cells) = row.as_array() {
            let rendered: Vec<String> = cells.iter().map(render_cell).collect();
            lines.push(format!("| {} |", rendered.join(" | ")));
        }
    }
    lines.join("\n")
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn describe_result(columns: &[String], row_count: u64, truncated: bool) -> String {
    let mut paragraph = format!("Returned {row_count} row(s) across {} column(s).", columns.len());
    if truncated {
        paragraph.push_str(" The result was truncated by the row or byte cap; re-run with a narrower predicate for a complete view.");
    }
    paragraph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_table_with_header_and_rows() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![json!([1, "a"]), json!([2, "b"])];
        let table = render_table(&columns, &rows);
        assert!(table.contains("| id | name |"));
        assert!(table.contains("| 1 | a |"));
    }
}
