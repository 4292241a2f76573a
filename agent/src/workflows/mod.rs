//! Five named, bounded agentic loops over the registered tools, each
//! producing an `AgentReport`. Each workflow runs its own fixed, numbered
//! procedure deterministically over tool calls; the `ReasoningClient` seam
//! (`WorkflowContext::reasoning`) is exposed for a workflow that needs a
//! one-off narrative judgment call, but the current five run entirely on
//! tool output and rule-based classification.

mod db_inspector;
mod incident_triage;
mod replication_health;
mod running_query;
mod slow_query;
mod state;

pub use db_inspector::{DbInspectorParams, DbInspectorWorkflow};
pub use incident_triage::{IncidentTriageParams, IncidentTriageWorkflow};
pub use replication_health::{ReplicationHealthParams, ReplicationHealthWorkflow};
pub use running_query::{RunningQueryParams, RunningQueryWorkflow};
pub use slow_query::{SlowQueryParams, SlowQueryWorkflow};
pub use state::{TurnBudget, WorkflowContext, DEFAULT_TURN_BUDGET, TRIAGE_TURN_BUDGET};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, ErrorKind};
use crate::report::AgentReport;

/// A named diagnostic procedure implemented as a bounded reasoning loop
/// over tools (see GLOSSARY). Workflows are resolved by name through a
/// registry so the
/// db-inspector workflow can be invoked by other workflows' recommendations
/// without a structural cycle.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, ctx: &WorkflowContext, params: Value) -> AgentReport;
}

/// Turns a failed `call_tool` into the right terminal report: a budget
/// exhaustion is `partial-budget` , every
/// other error is `partial-error` naming the failed tool.
pub(crate) fn tool_error_report(workflow_name: &str, failed_tool: &str, err: AgentError) -> AgentReport {
    if err.kind() == ErrorKind::BudgetExceeded {
        AgentReport::partial_budget(workflow_name, Vec::new(), format!("Turn budget exhausted while calling `{failed_tool}`."))
    } else {
        AgentReport::partial_error(workflow_name, failed_tool, err.to_string())
    }
}
