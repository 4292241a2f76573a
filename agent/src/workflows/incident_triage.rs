use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{self, HealthSnapshot};
use crate::report::{AgentReport, Finding};

use super::{Workflow, WorkflowContext};

pub const WORKFLOW_NAME: &str = "incident-triage";

const DEFAULT_MAX_ERROR_PATTERNS: u32 = 20;
const DEFAULT_MAX_LOG_LINES: usize = 5_000;
const MAX_CAUSES: usize = 3;

/// Soft thresholds gating whether a cause is reported at all, erring toward
/// silence over false alarms. Picked from the golden status-variable set
/// already sampled by the health snapshot.
const CONNECTION_SATURATION_RATIO: f64 = 0.9;
const LOCK_WAIT_COUNT_THRESHOLD: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct IncidentTriageParams {
    #[serde(default)]
    pub error_log_path: Option<String>,
    #[serde(default)]
    pub managed_service_id: Option<String>,
    #[serde(default = "default_max_error_patterns")]
    pub max_error_patterns: u32,
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,
}

fn default_max_error_patterns() -> u32 {
    DEFAULT_MAX_ERROR_PATTERNS
}

fn default_max_log_lines() -> usize {
    DEFAULT_MAX_LOG_LINES
}

struct Cause {
    pattern_name: String,
    severity: &'static str,
    checks: Vec<String>,
    mitigations: Vec<String>,
    do_not: Vec<String>,
}

/// This is the workflow the orchestrator runs first for
/// generic "something is wrong" requests, then conditionally chains one
/// more workflow based on what it finds (see `orchestrator.rs`).
pub struct IncidentTriageWorkflow;

#[async_trait]
impl Workflow for IncidentTriageWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW_NAME
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> AgentReport {
        let params: IncidentTriageParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return AgentReport::partial_error(WORKFLOW_NAME, "parameters", e.to_string()),
        };

        let mut snapshot = match build_snapshot_from_tool(ctx).await {
            Ok(s) => s,
            Err(e) => return super::tool_error_report(WORKFLOW_NAME, "run_readonly_query", e),
        };
        if let Some(service_id) = &params.managed_service_id {
            enrich_with_external_metrics(ctx, &mut snapshot, service_id).await;
        }

        let log_patterns = match gather_log_patterns(ctx, &params).await {
            Ok(p) => p,
            Err(e) => {
                // degraded, not fatal: the health snapshot alone still yields causes
                tracing::warn!(error = %e, "log ingestion unavailable for incident triage, continuing with DB signal only");
                Vec::new()
            }
        };

        let causes = correlate_causes(&snapshot, &log_patterns);

        let severity = causes.iter().map(|c| c.severity).max_by_key(|s| severity_rank(s)).unwrap_or("info");
        let findings: Vec<Finding> = causes
            .iter()
            .map(|c| Finding {
                title: format!("{} ({})", c.pattern_name, c.severity),
                indicators: c.checks.clone(),
                suggested_actions: c.mitigations.iter().cloned().chain(c.do_not.iter().map(|d| format!("Do not: {d}"))).collect(),
            })
            .collect();

        let markdown = render_markdown(&snapshot, &causes);
        AgentReport::complete(WORKFLOW_NAME, severity, findings, markdown)
    }
}

async fn build_snapshot_from_tool(ctx: &WorkflowContext) -> crate::error::AgentResult<HealthSnapshot> {
    // The tool-runtime path already validated and executed SHOW GLOBAL
    // STATUS; re-derive the typed snapshot the same way `db::build_health_snapshot`
    // would, but through the tool layer rather than a direct gateway reference, since
    // workflows only ever see tools, never the gateway itself.
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": "SHOW GLOBAL STATUS", "row_cap": 1000 })).await?;
    let rows = result["rows"].as_array().cloned().unwrap_or_default();

    let mut connections = std::collections::HashMap::new();
    let mut locks_and_transactions = std::collections::HashMap::new();
    let mut query_activity = std::collections::HashMap::new();
    let mut other = std::collections::HashMap::new();

    for row in rows {
        let cells = match row.as_array() {
            Some(c) if c.len() >= 2 => c,
            _ => continue,
        };
        let name = cells[0].as_str().unwrap_or_default().to_string();
        if !db::GOLDEN_STATUS_VARIABLES.contains(&name.as_str()) {
            continue;
        }
        let value = cells[1].as_str().map(str::to_string).unwrap_or_else(|| cells[1].to_string());
        match name.as_str() {
            "Threads_connected" | "Threads_running" | "Connections" | "Max_used_connections" | "Aborted_connects" | "Aborted_clients" | "Connection_errors_max_connections" => {
                connections.insert(name, value);
            }
            "Table_locks_immediate" | "Table_locks_waited" | "Innodb_row_lock_time" | "Innodb_row_lock_waits" | "Innodb_history_list_length" => {
                locks_and_transactions.insert(name, value);
            }
            "Questions" | "Queries" | "Slow_queries" | "Created_tmp_disk_tables" => {
                query_activity.insert(name, value);
            }
            _ => {
                other.insert(name, value);
            }
        }
    }

    Ok(HealthSnapshot {
        connections,
        resource_pressure: db::ResourcePressure { status_variables: other, external_cpu_percent: None, external_disk_utilization_percent: None },
        locks_and_transactions,
        query_activity,
        replication: None,
    })
}

/// Enriches the snapshot with a CPU and a disk utilization reading from the
/// managed observability endpoint. Each metric is fetched independently; a
/// failure on one leaves that field `None` rather than discarding the other.
async fn enrich_with_external_metrics(ctx: &WorkflowContext, snapshot: &mut HealthSnapshot, service_id: &str) {
    match ctx.call_tool("external_metrics", json!({ "metric": "cpu" })).await {
        Ok(v) => snapshot.resource_pressure.external_cpu_percent = v["value"].as_f64(),
        Err(e) => tracing::warn!(service_id, error = %e, "cpu metric unavailable"),
    }
    match ctx.call_tool("external_metrics", json!({ "metric": "disk_data" })).await {
        Ok(v) => snapshot.resource_pressure.external_disk_utilization_percent = v["value"].as_f64(),
        Err(e) => tracing::warn!(service_id, error = %e, "disk metric unavailable"),
    }
}

async fn gather_log_patterns(ctx: &WorkflowContext, params: &IncidentTriageParams) -> crate::error::AgentResult<Vec<Value>> {
    let text = if let Some(path) = &params.error_log_path {
        let result = ctx.call_tool("tail_local_log", json!({ "path": path, "max_lines": params.max_log_lines })).await?;
        result["text"].as_str().unwrap_or_default().to_string()
    } else if params.managed_service_id.is_some() {
        let now = chrono::Utc::now();
        let from = now - chrono::Duration::hours(1);
        let result = ctx
            .call_tool("fetch_remote_log", json!({ "from_time": from.to_rfc3339(), "to_time": now.to_rfc3339() }))
            .await?;
        result["text"].as_str().unwrap_or_default().to_string()
    } else {
        return Ok(Vec::new());
    };

    let result = ctx.call_tool("extract_patterns", json!({ "text": text, "max_patterns": params.max_error_patterns })).await?;
    Ok(result.as_array().cloned().unwrap_or_default())
}

fn correlate_causes(snapshot: &HealthSnapshot, log_patterns: &[Value]) -> Vec<Cause> {
    let mut causes = Vec::new();

    if let (Some(connected), Some(max_used)) = (
        parse_u64(snapshot.connections.get("Threads_connected")),
        parse_u64(snapshot.connections.get("Max_used_connections")),
    ) {
        if max_used > 0 && connected as f64 / max_used as f64 >= CONNECTION_SATURATION_RATIO {
            causes.push(Cause {
                pattern_name: "connection saturation".to_string(),
                severity: "warning",
                checks: vec![
                    format!("Threads_connected = {connected}"),
                    format!("Max_used_connections = {max_used}"),
                    "Check max_connections against current load".to_string(),
                ],
                mitigations: vec![
                    "Raise max_connections if headroom allows it.".to_string(),
                    "Audit application connection pooling for leaks.".to_string(),
                ],
                do_not: vec!["Do not restart the server to \"clear\" connections without checking for in-flight transactions.".to_string()],
            });
        }
    }

    if let Some(waits) = parse_u64(snapshot.locks_and_transactions.get("Innodb_row_lock_waits")) {
        if waits >= LOCK_WAIT_COUNT_THRESHOLD {
            causes.push(Cause {
                pattern_name: "lock contention".to_string(),
                severity: "warning",
                checks: vec![
                    format!("Innodb_row_lock_waits = {waits}"),
                    "Run the running-query workflow to identify blocking sessions".to_string(),
                ],
                mitigations: vec!["Shorten long-running transactions.".to_string(), "Add an index to reduce lock scope.".to_string()],
                do_not: vec!["Do not blanket-kill sessions without confirming they are the blocker.".to_string()],
            });
        }
    }

    let error_count = log_patterns
        .iter()
        .filter(|p| p.get("severity").and_then(Value::as_str).map(|s| s.eq_ignore_ascii_case("error")).unwrap_or(false))
        .count();
    if error_count > 0 {
        let sample = log_patterns.iter().find(|p| p.get("severity").and_then(Value::as_str) == Some("Error"));
        causes.push(Cause {
            pattern_name: "recurring error-log pattern".to_string(),
            severity: "error",
            checks: vec![
                format!("{error_count} distinct error-severity pattern(s) found in the log window"),
                sample.and_then(|s| s.get("sample")).and_then(Value::as_str).map(|s| format!("sample: {s}")).unwrap_or_default(),
            ],
            mitigations: vec!["Cross-reference the fingerprint against recent deploys or config changes.".to_string()],
            do_not: vec!["Do not suppress the error at the application layer without understanding root cause.".to_string()],
        });
    }

    causes.truncate(MAX_CAUSES);
    causes
}

fn parse_u64(value: Option<&String>) -> Option<u64> {
    value.and_then(|v| v.parse().ok())
}

fn severity_rank(severity: &str) -> u8 {
    match severity {
        "error" => 2,
        "warning" => 1,
        _ => 0,
    }
}

fn render_markdown(snapshot: &HealthSnapshot, causes: &[Cause]) -> String {
    let mut md = String::from("## Incident triage\n\n");
    md.push_str(&format!(
        "Connections tracked: {}. Lock/transaction signals tracked: {}. Query-activity signals tracked: {}.\n\n",
        snapshot.connections.len(),
        snapshot.locks_and_transactions.len(),
        snapshot.query_activity.len(),
    ));
    if snapshot.resource_pressure.external_cpu_percent.is_none() {
        md.push_str("_External CPU/disk enrichment not available for this request._\n\n");
    }
    if causes.is_empty() {
        md.push_str("No likely cause crossed its soft threshold.\n");
        return md;
    }
    for cause in causes {
        md.push_str(&format!("### {} ({})\n\n", cause.pattern_name, cause.severity));
        for check in &cause.checks {
            if !check.is_empty() {
                md.push_str(&format!("- check: {check}\n"));
            }
        }
        for m in &cause.mitigations {
            md.push_str(&format!("- mitigation: {m}\n"));
        }
        for d in &cause.do_not {
            md.push_str(&format!("- do-not: {d}\n"));
        }
        md.push('\n');
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(connections: &[(&str, &str)]) -> HealthSnapshot {
        let mut map = std::collections::HashMap::new();
        for (k, v) in connections {
            map.insert(k.to_string(), v.to_string());
        }
        HealthSnapshot { connections: map, ..Default::default() }
    }

    #[test]
    fn flags_connection_saturation_above_threshold() {
        let snapshot = snapshot_with(&[("Threads_connected", "95"), ("Max_used_connections", "100")]);
        let causes = correlate_causes(&snapshot, &[]);
        assert!(causes.iter().any(|c| c.pattern_name == "connection saturation"));
    }

    #[test]
    fn no_causes_when_nothing_crosses_threshold() {
        let snapshot = snapshot_with(&[("Threads_connected", "2"), ("Max_used_connections", "100")]);
        let causes = correlate_causes(&snapshot, &[]);
        assert!(causes.is_empty());
    }

    #[test]
    fn caps_at_three_causes() {
        let mut snapshot = snapshot_with(&[("Threads_connected", "99"), ("Max_used_connections", "100")]);
        snapshot.locks_and_transactions.insert("Innodb_row_lock_waits".to_string(), "50".to_string());
        let log_patterns = vec![json!({ "severity": "Error", "sample": "x" })];
        let causes = correlate_causes(&snapshot, &log_patterns);
        assert!(causes.len() <= MAX_CAUSES);
    }
}
