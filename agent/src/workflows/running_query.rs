use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::report::{AgentReport, Finding};

use super::{Workflow, WorkflowContext};

pub const WORKFLOW_NAME: &str = "running-query";

const DEFAULT_MIN_EXECUTION_SECS: f64 = 1.0;
const DEFAULT_MAX_QUERIES: u32 = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct RunningQueryParams {
    #[serde(default = "default_min_execution_secs")]
    pub min_execution_secs: f64,
    #[serde(default)]
    pub include_sleeping: bool,
    #[serde(default = "default_max_queries")]
    pub max_queries: u32,
}

fn default_min_execution_secs() -> f64 {
    DEFAULT_MIN_EXECUTION_SECS
}

fn default_max_queries() -> u32 {
    DEFAULT_MAX_QUERIES
}

struct Session {
    id: u64,
    user: String,
    db: String,
    command: String,
    time_secs: i64,
    info: String,
}

/// `SHOW PROCESSLIST`-equivalent polling rebuilt atop direct
/// `information_schema.processlist` access.
pub struct RunningQueryWorkflow;

#[async_trait]
impl Workflow for RunningQueryWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW_NAME
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> AgentReport {
        let params: RunningQueryParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return AgentReport::partial_error(WORKFLOW_NAME, "parameters", e.to_string()),
        };
        let max_queries = params.max_queries.max(1);

        let sessions = match snapshot_sessions(ctx).await {
            Ok(s) => s,
            Err(e) => return super::tool_error_report(WORKFLOW_NAME, "run_readonly_query", e),
        };

        let mut selected: Vec<&Session> = sessions
            .iter()
            .filter(|s| params.include_sleeping || !s.command.eq_ignore_ascii_case("sleep"))
            .filter(|s| s.time_secs as f64 >= params.min_execution_secs)
            .collect();
        selected.sort_by(|a, b| b.time_secs.cmp(&a.time_secs));
        selected.truncate(max_queries as usize);

        let (blockers, blocker_detection_degraded) = blocker_ids(ctx).await;

        let mut findings = Vec::new();
        if blocker_detection_degraded {
            findings.push(Finding {
                title: "lock-blocker detection degraded".to_string(),
                indicators: vec!["neither sys.innodb_lock_waits nor information_schema.INNODB_LOCK_WAITS returned usable rows".to_string()],
                suggested_actions: vec!["Check that the account has PROCESS/INNODB_LOCK_WAITS visibility, or that the sys schema is installed on this server.".to_string()],
            });
        }
        for session in &selected {
            let is_blocker = blockers.contains(&session.id);
            let mut indicators = vec![
                format!("user: {}", session.user),
                format!("db: {}", session.db),
                format!("elapsed: {}s", session.time_secs),
            ];
            if is_blocker {
                indicators.push("holds a lock another session is waiting on".to_string());
            }

            let explain = explain_session(ctx, session).await;
            let mut suggested_actions = Vec::new();
            if is_blocker {
                suggested_actions.push(format!("Consider `KILL {}` if this session is not expected to finish soon.", session.id));
            }
            if let Some(plan_note) = explain {
                suggested_actions.push(plan_note);
            }
            if suggested_actions.is_empty() {
                suggested_actions.push("Monitor; no blocking relationship detected yet.".to_string());
            }

            findings.push(Finding {
                title: format!("session {} ({})", session.id, truncate(&session.info, 80)),
                indicators,
                suggested_actions,
            });
        }

        let severity = if blockers.is_empty() { "info" } else { "warning" };
        let markdown = render_markdown(&findings, blockers.len());
        AgentReport::complete(WORKFLOW_NAME, severity, findings, markdown)
    }
}

async fn snapshot_sessions(ctx: &WorkflowContext) -> crate::error::AgentResult<Vec<Session>> {
    let sql = "SELECT ID, USER, DB, COMMAND, TIME, INFO FROM information_schema.PROCESSLIST";
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": sql, "row_cap": 1000 })).await?;
    let rows = result["rows"].as_array().cloned().unwrap_or_default();
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let cells = row.as_array()?;
            Some(Session {
                id: cells.first()?.as_u64().unwrap_or(0),
                user: cells.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
                db: cells.get(2).and_then(Value::as_str).unwrap_or_default().to_string(),
                command: cells.get(3).and_then(Value::as_str).unwrap_or_default().to_string(),
                time_secs: cells.get(4).and_then(Value::as_i64).unwrap_or(0),
                info: cells.get(5).and_then(Value::as_str).unwrap_or_default().to_string(),
            })
        })
        .collect())
}

/// A session is a blocker if it appears as `blocking_pid` for any row in the
/// InnoDB lock-wait view. Tries MySQL's `sys` schema first, then falls back
/// to the `information_schema` views MariaDB (and a MySQL server without
/// `sys` installed) actually ships. Returns whether either query succeeded
/// so the caller can report degraded detection instead of reporting a
/// silent, misleadingly-empty blocker set.
async fn blocker_ids(ctx: &WorkflowContext) -> (HashSet<u64>, bool) {
    if let Ok(ids) = blocker_ids_from_sys_schema(ctx).await {
        return (ids, false);
    }
    if let Ok(ids) = blocker_ids_from_information_schema(ctx).await {
        return (ids, false);
    }
    (HashSet::new(), true)
}

async fn blocker_ids_from_sys_schema(ctx: &WorkflowContext) -> crate::error::AgentResult<HashSet<u64>> {
    let sql = "SELECT DISTINCT blocking_pid FROM sys.innodb_lock_waits";
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": sql, "row_cap": 1000 })).await?;
    let rows = result["rows"].as_array().cloned().unwrap_or_default();
    Ok(rows.into_iter().filter_map(|row| row.as_array()?.first()?.as_u64()).collect())
}

async fn blocker_ids_from_information_schema(ctx: &WorkflowContext) -> crate::error::AgentResult<HashSet<u64>> {
    let sql = "SELECT DISTINCT t.trx_mysql_thread_id \
               FROM information_schema.INNODB_LOCK_WAITS w \
               JOIN information_schema.INNODB_TRX t ON t.trx_id = w.blocking_trx_id";
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": sql, "row_cap": 1000 })).await?;
    let rows = result["rows"].as_array().cloned().unwrap_or_default();
    Ok(rows.into_iter().filter_map(|row| row.as_array()?.first()?.as_u64()).collect())
}

/// Fetches an EXPLAIN plan by schema-scoped re-preparation, never by
/// re-executing the session's own statement.
async fn explain_session(ctx: &WorkflowContext, session: &Session) -> Option<String> {
    if session.info.trim().is_empty() {
        return None;
    }
    let explain_sql = format!("EXPLAIN FORMAT=JSON {}", session.info);
    let args = if session.db.is_empty() { json!({ "sql": explain_sql }) } else { json!({ "sql": explain_sql, "database": session.db }) };
    let result = ctx.call_tool("run_readonly_query", args).await.ok()?;
    let plan = result["rows"].to_string();
    if plan.to_lowercase().contains("\"possible_keys\":null") {
        Some("No usable index found for this statement; consider adding one on the filter columns.".to_string())
    } else {
        None
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}…", &s[..max_len])
    }
}

fn render_markdown(findings: &[Finding], blocker_count: usize) -> String {
    let mut md = format!("## Running-query analysis\n\n{} session(s) analyzed, {blocker_count} acting as a lock blocker.\n\n", findings.len());
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
    fn truncate_shortens_long_strings() {
        let s = "a".repeat(100);
        let truncated = truncate(&s, 10);
        assert!(truncated.starts_with(&"a".repeat(10)));
        assert!(truncated.ends_with('…'));
    }
}
