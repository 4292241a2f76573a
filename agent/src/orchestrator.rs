//! Intent routing, conditional one-hop chaining, budget enforcement,
//! telemetry aggregation, and result synthesis across the named workflows.
//! Registries are built once and handed out as `Arc`-wrapped state to every
//! request rather than reconstructed per call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::llm::ReasoningClient;
use crate::report::AgentReport;
use crate::telemetry::{TelemetrySink, TelemetryTotals};
use crate::tools::ToolRegistry;
use crate::workflows::{
    DbInspectorWorkflow, IncidentTriageWorkflow, ReplicationHealthWorkflow, RunningQueryWorkflow, SlowQueryWorkflow, Workflow, WorkflowContext,
    DEFAULT_TURN_BUDGET, TRIAGE_TURN_BUDGET,
};

/// Overall wall-clock budget per orchestrator invocation:
/// generous enough to cover a triage-then-chain request against the
/// per-call deadlines already enforced by each tool.
const ORCHESTRATOR_DEADLINE: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
enum Route {
    Direct { workflow: &'static str, params: serde_json::Value },
    Triage,
    Clarify(String),
}

struct KeywordRoute {
    keywords: &'static [&'static str],
    workflow: &'static str,
}

/// Keyword-match intent-routing table.
const KEYWORD_ROUTES: &[KeywordRoute] = &[
    KeywordRoute { keywords: &["slow queries", "query performance", "optimization", "slow log"], workflow: "slow-query" },
    KeywordRoute { keywords: &["running queries", "currently", "blocking", "active queries", "who's running"], workflow: "running-query" },
    KeywordRoute { keywords: &["replication", "replica lag", "replica", "master/slave", "replication health"], workflow: "replication-health" },
    KeywordRoute { keywords: &["execute sql", "select ", "information_schema", "show variable"], workflow: "db-inspector" },
];

const TRIAGE_KEYWORDS: &[&str] = &["health", "something is wrong", "incident", "why is it slow"];

/// Categories a triage cause's `pattern_name` is mapped to for the
/// conditional one-hop chain.
fn chain_target(cause_pattern_name: &str) -> Option<&'static str> {
    let lower = cause_pattern_name.to_lowercase();
    if lower.contains("lock") {
        Some("running-query")
    } else if lower.contains("replication") {
        Some("replication-health")
    } else if lower.contains("connection") || lower.contains("error-log") || lower.contains("query") {
        Some("slow-query")
    } else {
        None
    }
}

/// One entry of the combined result the orchestrator hands back: each
/// workflow that ran, in order, plus the final synthesis.
pub struct OrchestratorOutcome {
    pub root_invocation_id: Uuid,
    pub reports: Vec<AgentReport>,
    pub telemetry: TelemetryTotals,
    pub markdown: String,
}

pub struct Orchestrator {
    workflows: HashMap<&'static str, Arc<dyn Workflow>>,
    tools: Arc<ToolRegistry>,
    reasoning: Arc<dyn ReasoningClient>,
    telemetry: TelemetrySink,
}

impl Orchestrator {
    pub fn new(tools: Arc<ToolRegistry>, reasoning: Arc<dyn ReasoningClient>, telemetry: TelemetrySink) -> Self {
        let mut workflows: HashMap<&'static str, Arc<dyn Workflow>> = HashMap::new();
        workflows.insert("slow-query", Arc::new(SlowQueryWorkflow));
        workflows.insert("running-query", Arc::new(RunningQueryWorkflow));
        workflows.insert("replication-health", Arc::new(ReplicationHealthWorkflow));
        workflows.insert("db-inspector", Arc::new(DbInspectorWorkflow));
        workflows.insert("incident-triage", Arc::new(IncidentTriageWorkflow));
        Self { workflows, tools, reasoning, telemetry }
    }

    /// Runs a single named workflow directly, bypassing intent routing —
    /// the path the CLI's per-workflow subcommands use.
    pub async fn run_workflow(&self, workflow_name: &str, params: serde_json::Value) -> AgentResult<OrchestratorOutcome> {
        let root_invocation_id = Uuid::new_v4();
        let report = self.invoke(workflow_name, params, root_invocation_id).await?;
        self.finish(root_invocation_id, vec![report]).await
    }

    /// Routes a free-form request and runs the resulting
    /// strategy, chaining at most one follow-up workflow after triage.
    pub async fn handle_request(&self, query: &str) -> AgentResult<OrchestratorOutcome> {
        let root_invocation_id = Uuid::new_v4();
        let route = route_intent(query);

        let reports = match route {
            Route::Direct { workflow, params } => {
                vec![self.invoke(workflow, params, root_invocation_id).await?]
            }
            Route::Triage => {
                let mut reports = Vec::new();
                let triage_params = serde_json::json!({});
                let triage_report = self.invoke("incident-triage", triage_params, root_invocation_id).await?;

                let chain_workflow = triage_report.findings.first().and_then(|f| chain_target(&f.title));
                reports.push(triage_report);

                if let Some(next) = chain_workflow {
                    let params = if next == "slow-query" { serde_json::json!({ "window_hours": 1 }) } else { serde_json::json!({}) };
                    match self.invoke(next, params, root_invocation_id).await {
                        Ok(report) => reports.push(report),
                        Err(e) => tracing::warn!(workflow = next, error = %e, "chained workflow failed; keeping triage result"),
                    }
                }
                reports
            }
            Route::Clarify(message) => {
                return Ok(OrchestratorOutcome {
                    root_invocation_id,
                    reports: Vec::new(),
                    telemetry: TelemetryTotals::default(),
                    markdown: message,
                });
            }
        };

        self.finish(root_invocation_id, reports).await
    }

    async fn invoke(&self, workflow_name: &str, params: serde_json::Value, root_invocation_id: Uuid) -> AgentResult<AgentReport> {
        let workflow = self.workflows.get(workflow_name).cloned().ok_or_else(|| AgentError::UnknownTool(workflow_name.to_string()))?;
        let turn_budget = if workflow_name == "incident-triage" { TRIAGE_TURN_BUDGET } else { DEFAULT_TURN_BUDGET };
        let ctx = WorkflowContext::new(self.tools.clone(), self.reasoning.clone(), self.telemetry.clone(), root_invocation_id, turn_budget);

        match tokio::time::timeout(ORCHESTRATOR_DEADLINE, workflow.run(&ctx, params)).await {
            Ok(report) => Ok(report),
            Err(_) => Err(AgentError::Timeout(ORCHESTRATOR_DEADLINE)),
        }
    }

    async fn finish(&self, root_invocation_id: Uuid, reports: Vec<AgentReport>) -> AgentResult<OrchestratorOutcome> {
        let telemetry = self.telemetry.aggregate(root_invocation_id).await;
        let markdown = synthesize(&reports, &telemetry);
        Ok(OrchestratorOutcome { root_invocation_id, reports, telemetry, markdown })
    }
}

/// Keyword match against the table, falling
/// back to triage for generic distress signals, and a clarifying question
/// when nothing matches with confidence.
fn route_intent(query: &str) -> Route {
    let lower = query.to_lowercase();

    for route in KEYWORD_ROUTES {
        if route.keywords.iter().any(|kw| lower.contains(kw)) {
            return Route::Direct { workflow: route.workflow, params: serde_json::json!({}) };
        }
    }

    if TRIAGE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Route::Triage;
    }

    Route::Clarify(
        "I couldn't match this request to a specific diagnostic. Could you clarify whether you're asking about \
         slow queries, currently running queries, replication health, or a general incident?"
            .to_string(),
    )
}

/// Final result synthesis: executive summary, per-workflow
/// findings, correlated findings, prioritized recommendations, next
/// steps, telemetry totals. When only one workflow ran, its report is
/// passed through with headers and telemetry appended.
fn synthesize(reports: &[AgentReport], telemetry: &TelemetryTotals) -> String {
    let mut md = String::from("# Diagnostic summary\n\n");

    md.push_str("## Executive summary\n\n");
    if reports.is_empty() {
        md.push_str("No workflow produced a report.\n\n");
    } else {
        for report in reports {
            md.push_str(&format!("- **{}** finished as `{:?}` (severity: {})\n", report.workflow_name, report.terminal_state, report.severity));
        }
        md.push('\n');
    }

    md.push_str("## Per-workflow findings\n\n");
    for report in reports {
        md.push_str(&format!("### {}\n\n{}\n\n", report.workflow_name, report.markdown));
    }

    if reports.len() > 1 {
        md.push_str("## Correlated findings\n\n");
        let titles: Vec<&str> = reports.iter().flat_map(|r| r.findings.iter().map(|f| f.title.as_str())).collect();
        if titles.is_empty() {
            md.push_str("No cross-workflow correlation available.\n\n");
        } else {
            md.push_str(&format!("Findings span: {}.\n\n", titles.join("; ")));
        }
    }

    md.push_str("## Prioritized recommendations\n\n");
    let mut actions: Vec<&str> = reports.iter().flat_map(|r| r.findings.iter().flat_map(|f| f.suggested_actions.iter().map(String::as_str))).collect();
    actions.dedup();
    if actions.is_empty() {
        md.push_str("No specific action recommended.\n\n");
    } else {
        for action in actions {
            md.push_str(&format!("- {action}\n"));
        }
        md.push('\n');
    }

    md.push_str("## Next steps\n\n");
    md.push_str("Run the database-inspector workflow against any `information_schema` view named above for follow-up.\n\n");

    md.push_str("## Telemetry totals\n\n");
    md.push_str(&format!(
        "input tokens: {}, output tokens: {}, round trips: {}\n",
        telemetry.input_tokens, telemetry.output_tokens, telemetry.round_trips
    ));
    for (attribution, totals) in &telemetry.by_attribution {
        md.push_str(&format!("- {attribution}: {} total tokens over {} round trip(s)\n", totals.total_tokens, totals.round_trips));
    }

    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_slow_query_keywords() {
        let route = route_intent("Can you check query performance on this host?");
        assert!(matches!(route, Route::Direct { workflow: "slow-query", .. }));
    }

    #[test]
    fn routes_generic_incident_to_triage() {
        let route = route_intent("Something is wrong with the database");
        assert!(matches!(route, Route::Triage));
    }

    #[test]
    fn unmatched_request_asks_clarifying_question() {
        let route = route_intent("what's the weather");
        assert!(matches!(route, Route::Clarify(_)));
    }

    #[test]
    fn chain_target_maps_lock_to_running_query() {
        assert_eq!(chain_target("lock contention"), Some("running-query"));
    }

    #[test]
    fn chain_target_returns_none_for_unrecognized_cause() {
        assert_eq!(chain_target("mysterious anomaly"), None);
    }
}
