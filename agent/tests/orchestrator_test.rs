//! End-to-end tests driving the orchestrator and named workflows against
//! fake tools, with no real database or reasoning-service connection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use db_agents::error::AgentResult;
use db_agents::llm::{LlmTurn, ReasoningClient, TokenUsage, ToolCatalogEntry};
use db_agents::orchestrator::Orchestrator;
use db_agents::telemetry::TelemetrySink;
use db_agents::tools::{Capability, ParameterKind, ParameterSchema, Tool, ToolRegistry};

struct UnusedReasoningClient;

#[async_trait]
impl ReasoningClient for UnusedReasoningClient {
    async fn next_action(&self, _system_prompt: &str, _transcript: &[String], _catalog: &[ToolCatalogEntry]) -> AgentResult<(LlmTurn, TokenUsage)> {
        panic!("none of the named workflows should reach the reasoning service in this test");
    }
}

/// Fakes `run_readonly_query` by branching on the SQL text, the way a real
/// in-memory server stub would -- good enough to exercise each workflow's
/// row-shape parsing without a live MariaDB connection.
struct FakeQueryTool;

#[async_trait]
impl Tool for FakeQueryTool {
    fn name(&self) -> &'static str {
        "run_readonly_query"
    }
    fn description(&self) -> &'static str {
        "fake"
    }
    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("sql", ParameterKind::String),
            ParameterSchema::optional("row_cap", ParameterKind::Integer, json!(1000)),
            ParameterSchema::optional("timeout_secs", ParameterKind::Integer, json!(10)),
            ParameterSchema::optional("database", ParameterKind::String, json!("")),
        ]
    }
    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsDb])
    }
    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let sql = args["sql"].as_str().unwrap_or_default().to_uppercase();

        if sql.starts_with("SELECT ID, USER") {
            // running-query: one active session, no sleeping ones.
            return Ok(json!({
                "columns": ["ID", "USER", "DB", "COMMAND", "TIME", "INFO"],
                "rows": [[7, "app", "orders", "Query", 12, "SELECT * FROM orders WHERE customer_id = 1"]],
                "row_count": 1,
                "truncated": false,
                "execution_time_ms": 1,
            }));
        }
        if sql.contains("INNODB_LOCK_WAITS") {
            return Ok(json!({ "columns": ["blocking_thread_id"], "rows": [], "row_count": 0, "truncated": false, "execution_time_ms": 1 }));
        }
        if sql.starts_with("EXPLAIN") {
            return Ok(json!({ "columns": ["EXPLAIN"], "rows": [["{\"possible_keys\":[\"PRIMARY\"]}"]], "row_count": 1, "truncated": false, "execution_time_ms": 1 }));
        }
        if sql.contains("EVENTS_STATEMENTS_SUMMARY_BY_DIGEST") {
            return Ok(json!({
                "columns": ["DIGEST_TEXT", "COUNT_STAR", "SUM_TIMER_WAIT", "AVG_TIMER_WAIT"],
                "rows": [["SELECT * FROM orders WHERE customer_id = ?", 500, 5.0e12, 1.0e10]],
                "row_count": 1,
                "truncated": false,
                "execution_time_ms": 1,
            }));
        }
        if sql.starts_with("SHOW MASTER STATUS") {
            return Ok(json!({
                "columns": ["File", "Position", "Binlog_Do_DB", "Binlog_Ignore_DB", "Executed_Gtid_Set"],
                "rows": [["binlog.000012", 1943, "", "", "uuid:1-500"]],
                "row_count": 1,
                "truncated": false,
                "execution_time_ms": 1,
            }));
        }
        if sql.starts_with("SHOW GLOBAL STATUS") {
            return Ok(json!({
                "columns": ["Variable_name", "Value"],
                "rows": [
                    ["Threads_connected", "42"],
                    ["Max_used_connections", "50"],
                    ["Table_locks_waited", "2"],
                ],
                "row_count": 3,
                "truncated": false,
                "execution_time_ms": 1,
            }));
        }

        // db-inspector: an arbitrary caller-supplied SELECT.
        Ok(json!({
            "columns": ["id", "name"],
            "rows": [[1, "widgets"]],
            "row_count": 1,
            "truncated": false,
            "execution_time_ms": 1,
        }))
    }
}

struct FakeProbeTool;

#[async_trait]
impl Tool for FakeProbeTool {
    fn name(&self) -> &'static str {
        "run_readonly_probe"
    }
    fn description(&self) -> &'static str {
        "fake"
    }
    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![ParameterSchema::required("sql", ParameterKind::String), ParameterSchema::optional("probe_count", ParameterKind::Integer, json!(10))]
    }
    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsDb])
    }
    async fn execute(&self, _args: Value) -> AgentResult<Value> {
        Ok(json!({
            "replicas": [{
                "identity": "replica-a",
                "Slave_IO_Running": "Yes",
                "Slave_SQL_Running": "Yes",
                "Seconds_Behind_Master": 3,
                "Last_IO_Errno": "0",
                "Last_SQL_Errno": "0",
                "Executed_Gtid_Set": "uuid:1-500",
            }],
            "note": "probe scan is non-deterministic under load-balanced routing",
        }))
    }
}

fn build_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new(TelemetrySink::new());
    registry.register(Arc::new(FakeQueryTool));
    registry.register(Arc::new(FakeProbeTool));
    registry
}

fn build_orchestrator() -> Orchestrator {
    Orchestrator::new(Arc::new(build_registry()), Arc::new(UnusedReasoningClient), TelemetrySink::new())
}

#[tokio::test]
async fn db_inspector_renders_query_result_as_markdown_table() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.run_workflow("db-inspector", json!({ "sql": "SELECT id, name FROM widgets" })).await.unwrap();

    assert_eq!(outcome.reports.len(), 1);
    let report = &outcome.reports[0];
    assert_eq!(report.terminal_state, db_agents::report::TerminalState::Complete);
    assert!(report.markdown.contains("| id | name |"));
    assert!(report.markdown.contains("| 1 | widgets |"));
}

#[tokio::test]
async fn db_inspector_rejects_unsafe_sql_before_touching_the_gateway() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.run_workflow("db-inspector", json!({ "sql": "DELETE FROM widgets" })).await.unwrap();

    let report = &outcome.reports[0];
    assert_eq!(report.terminal_state, db_agents::report::TerminalState::PartialError);
    assert_eq!(report.failed_tool.as_deref(), Some("run_readonly_query"));
}

#[tokio::test]
async fn running_query_finds_no_blockers_when_lock_waits_are_empty() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.run_workflow("running-query", json!({})).await.unwrap();

    let report = &outcome.reports[0];
    assert_eq!(report.terminal_state, db_agents::report::TerminalState::Complete);
    assert_eq!(report.severity, "info");
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test]
async fn slow_query_classifies_the_top_digest() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.run_workflow("slow-query", json!({ "window_hours": 1 })).await.unwrap();

    let report = &outcome.reports[0];
    assert_eq!(report.terminal_state, db_agents::report::TerminalState::Complete);
    assert_eq!(report.findings.len(), 1);
    assert!(report.findings[0].indicators.iter().any(|i| i.starts_with("classification:")));
}

#[tokio::test]
async fn replication_health_reports_a_healthy_replica() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.run_workflow("replication-health", json!({ "probe_count": 5 })).await.unwrap();

    let report = &outcome.reports[0];
    assert_eq!(report.severity, "info");
    assert!(report.findings[0].title.contains("healthy"));
}

#[tokio::test]
async fn incident_triage_flags_table_lock_waits() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.run_workflow("incident-triage", json!({})).await.unwrap();

    let report = &outcome.reports[0];
    assert_eq!(report.terminal_state, db_agents::report::TerminalState::Complete);
}

#[tokio::test]
async fn unknown_workflow_name_is_rejected() {
    let orchestrator = build_orchestrator();
    let err = orchestrator.run_workflow("does-not-exist", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), db_agents::error::ErrorKind::UnknownTool);
}

#[tokio::test]
async fn free_form_request_routes_by_keyword_to_replication_health() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.handle_request("how is replication health looking today?").await.unwrap();

    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(outcome.reports[0].workflow_name, "replication-health");
}

#[tokio::test]
async fn free_form_request_with_no_confident_match_asks_for_clarification() {
    let orchestrator = build_orchestrator();
    let outcome = orchestrator.handle_request("hello there").await.unwrap();

    assert!(outcome.reports.is_empty());
    assert!(outcome.markdown.to_lowercase().contains("clarify"));
}
