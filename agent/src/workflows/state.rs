use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AgentError, AgentResult};
use crate::llm::ReasoningClient;
use crate::telemetry::TelemetrySink;
use crate::tools::ToolRegistry;

pub const DEFAULT_TURN_BUDGET: u32 = 20;
pub const TRIAGE_TURN_BUDGET: u32 = 30;

/// Shared dependencies every workflow needs: the tool runtime, the
/// reasoning-service client, and the telemetry sink it appends to. Built
/// once by the orchestrator and passed by reference.
pub struct WorkflowContext {
    pub tools: Arc<ToolRegistry>,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub telemetry: TelemetrySink,
    pub root_invocation_id: Uuid,
    budget: Mutex<TurnBudget>,
}

impl WorkflowContext {
    pub fn new(tools: Arc<ToolRegistry>, reasoning: Arc<dyn ReasoningClient>, telemetry: TelemetrySink, root_invocation_id: Uuid, turn_budget: u32) -> Self {
        Self { tools, reasoning, telemetry, root_invocation_id, budget: Mutex::new(TurnBudget::new(turn_budget)) }
    }

    /// Spends one turn, then dispatches a tool call through the registry. `self`
    /// always as parent -- the workflow itself isn't a recorded invocation,
    /// only the tools it calls are. Returns `BudgetExceeded` without
    /// dispatching once the turn budget is exhausted.
    pub async fn call_tool(&self, name: &str, args: Value) -> AgentResult<Value> {
        self.budget.lock().await.spend()?;
        let outcome = self.tools.dispatch(name, args, None, self.root_invocation_id).await?;
        Ok(outcome.value)
    }

    pub async fn turns_used(&self) -> u32 {
        self.budget.lock().await.used()
    }

    pub async fn record_round_trip(&self, attribution: &str, usage: crate::llm::TokenUsage) {
        self.telemetry
            .append(crate::telemetry::TelemetryRecord {
                root_invocation_id: self.root_invocation_id,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage.input_tokens + usage.output_tokens,
                round_trips: 1,
                attribution: attribution.to_string(),
            })
            .await;
    }
}

/// Turn-budget bookkeeping shared by every workflow's loop.
pub struct TurnBudget {
    max: u32,
    used: u32,
}

impl TurnBudget {
    pub fn new(max: u32) -> Self {
        Self { max, used: 0 }
    }

    /// Spends one turn; returns `BudgetExceeded` once the cap is hit so the
    /// caller can emit a `partial-budget` report instead of continuing.
    pub fn spend(&mut self) -> AgentResult<()> {
        if self.used >= self.max {
            return Err(AgentError::BudgetExceeded);
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exhausts_after_max_spends() {
        let mut budget = TurnBudget::new(2);
        assert!(budget.spend().is_ok());
        assert!(budget.spend().is_ok());
        assert!(budget.spend().is_err());
    }
}
