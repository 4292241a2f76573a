use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::report::{AgentReport, Finding};

use super::{Workflow, WorkflowContext};

pub const WORKFLOW_NAME: &str = "replication-health";

const DEFAULT_PROBE_COUNT: u32 = 10;
const MAX_PROBE_COUNT: u32 = 20;
/// Soft threshold past which a replica's lag is reported as degraded rather
/// than healthy.
const LAG_WARNING_SECS: i64 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicationHealthParams {
    #[serde(default = "default_probe_count")]
    pub probe_count: u32,
}

fn default_probe_count() -> u32 {
    DEFAULT_PROBE_COUNT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaHealth {
    Healthy,
    Degraded,
    Broken,
}

impl ReplicaHealth {
    fn label(&self) -> &'static str {
        match self {
            ReplicaHealth::Healthy => "healthy",
            ReplicaHealth::Degraded => "degraded",
            ReplicaHealth::Broken => "broken",
        }
    }
}

/// Cluster-topology inspection rebuilt atop
/// `SHOW SLAVE STATUS`/`run_readonly_probe`.
pub struct ReplicationHealthWorkflow;

#[async_trait]
impl Workflow for ReplicationHealthWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW_NAME
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> AgentReport {
        let params: ReplicationHealthParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return AgentReport::partial_error(WORKFLOW_NAME, "parameters", e.to_string()),
        };
        let probe_count = params.probe_count.clamp(1, MAX_PROBE_COUNT);

        let master_gtid = master_status(ctx).await;

        let probe = ctx.call_tool("run_readonly_probe", json!({ "sql": "SHOW SLAVE STATUS", "probe_count": probe_count })).await;
        let (replicas, note) = match probe {
            Ok(v) => {
                let replicas = v["replicas"].as_array().cloned().unwrap_or_default();
                let note = v["note"].as_str().unwrap_or_default().to_string();
                (replicas, note)
            }
            Err(e) => return super::tool_error_report(WORKFLOW_NAME, "run_readonly_probe", e),
        };

        let topology = topology_sketch(ctx).await;

        let mut findings = Vec::new();
        let mut healthy = 0;
        let mut degraded = 0;
        let mut broken = 0;

        for replica in &replicas {
            let identity = replica["identity"].as_str().unwrap_or("unknown").to_string();
            let io_running = field_eq(replica, "Slave_IO_Running", "Yes");
            let sql_running = field_eq(replica, "Slave_SQL_Running", "Yes");
            let seconds_behind = replica.get("Seconds_Behind_Master").and_then(Value::as_i64);
            let last_io_errno = field_str(replica, "Last_IO_Errno");
            let last_sql_errno = field_str(replica, "Last_SQL_Errno");
            let replica_gtid = field_str(replica, "Executed_Gtid_Set");

            let health = if !io_running || !sql_running {
                broken += 1;
                ReplicaHealth::Broken
            } else if seconds_behind.map(|s| s > LAG_WARNING_SECS).unwrap_or(false) {
                degraded += 1;
                ReplicaHealth::Degraded
            } else {
                healthy += 1;
                ReplicaHealth::Healthy
            };

            let mut indicators = vec![
                format!("IO thread running: {io_running}"),
                format!("SQL thread running: {sql_running}"),
                format!("seconds behind source: {}", seconds_behind.map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_string())),
            ];
            if let Some(errno) = &last_io_errno {
                if errno != "0" {
                    indicators.push(format!("last IO errno: {errno}"));
                }
            }
            if let Some(errno) = &last_sql_errno {
                if errno != "0" {
                    indicators.push(format!("last SQL errno: {errno}"));
                }
            }
            if let (Some(master), Some(replica_set)) = (&master_gtid, &replica_gtid) {
                if master != replica_set {
                    indicators.push("GTID set diverges from master".to_string());
                }
            }

            let suggested_actions = match health {
                ReplicaHealth::Broken => vec!["Inspect the replica error log and consider `START SLAVE` after resolving the underlying error.".to_string()],
                ReplicaHealth::Degraded => vec!["Check for long-running transactions or I/O contention on the replica.".to_string()],
                ReplicaHealth::Healthy => Vec::new(),
            };

            findings.push(Finding { title: format!("{identity}: {}", health.label()), indicators, suggested_actions });
        }

        let severity = if broken > 0 { "error" } else if degraded > 0 { "warning" } else { "info" };
        let markdown = render_markdown(healthy, degraded, broken, &note, topology.as_deref(), &findings);
        AgentReport::complete(WORKFLOW_NAME, severity, findings, markdown)
    }
}

async fn master_status(ctx: &WorkflowContext) -> Option<String> {
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": "SHOW MASTER STATUS" })).await.ok()?;
    let rows = result["rows"].as_array()?;
    let row = rows.first()?.as_array()?;
    row.get(4).and_then(Value::as_str).map(str::to_string)
}

async fn topology_sketch(ctx: &WorkflowContext) -> Option<String> {
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": "SHOW ALL SLAVES HOSTS" })).await.ok()?;
    let row_count = result["row_count"].as_u64().unwrap_or(0);
    Some(format!("{row_count} host(s) reported via SHOW ALL SLAVES HOSTS"))
}

fn field_eq(replica: &Value, name: &str, expected: &str) -> bool {
    replica.get(name).and_then(Value::as_str).map(|s| s.eq_ignore_ascii_case(expected)).unwrap_or(false)
}

fn field_str(replica: &Value, name: &str) -> Option<String> {
    replica.get(name).and_then(Value::as_str).map(str::to_string)
}

fn render_markdown(healthy: u32, degraded: u32, broken: u32, note: &str, topology: Option<&str>, findings: &[Finding]) -> String {
    let mut md = format!("## Replication health\n\nHealthy: {healthy}, degraded: {degraded}, broken: {broken}.\n\n_{note}_\n\n");
    if let Some(topology) = topology {
        md.push_str(&format!("Topology: {topology}.\n\n"));
    }
    for finding in findings {
        md.push_str(&format!("### {}\n\n", finding.title));
        for indicator in &finding.indicators {
            md.push_str(&format!("- {indicator}\n"));
        }
        for action in &finding.suggested_actions {
            md.push_str(&format!("- {action}\n"));
        }
        md.push('\n');
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_eq_is_case_insensitive() {
        let replica = json!({ "Slave_IO_Running": "yes" });
        assert!(field_eq(&replica, "Slave_IO_Running", "Yes"));
    }
}
