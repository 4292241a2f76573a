//! Agent report: the structured output every workflow produces
//! on termination, and the orchestrator synthesizes across children.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Complete,
    PartialBudget,
    PartialError,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub title: String,
    pub indicators: Vec<String>,
    pub suggested_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub workflow_name: String,
    pub terminal_state: TerminalState,
    /// Set only when `terminal_state == PartialError`: which tool failed
    /// and how.
    pub failed_tool: Option<String>,
    pub failure_reason: Option<String>,
    pub severity: String,
    pub findings: Vec<Finding>,
    pub things_not_to_do: Vec<String>,
    pub markdown: String,
}

impl AgentReport {
    pub fn complete(workflow_name: impl Into<String>, severity: impl Into<String>, findings: Vec<Finding>, markdown: String) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            terminal_state: TerminalState::Complete,
            failed_tool: None,
            failure_reason: None,
            severity: severity.into(),
            findings,
            things_not_to_do: Vec::new(),
            markdown,
        }
    }

    pub fn partial_budget(workflow_name: impl Into<String>, findings: Vec<Finding>, markdown: String) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            terminal_state: TerminalState::PartialBudget,
            failed_tool: None,
            failure_reason: None,
            severity: "unknown".to_string(),
            findings,
            things_not_to_do: Vec::new(),
            markdown: format!("{markdown}\n\n_Coverage is partial: the turn budget was exhausted._"),
        }
    }

    pub fn partial_error(workflow_name: impl Into<String>, failed_tool: impl Into<String>, reason: impl Into<String>) -> Self {
        let failed_tool = failed_tool.into();
        let reason = reason.into();
        let markdown = format!(
            "Tool `{failed_tool}` failed: {reason}\n\nSuggested follow-up: run the database-inspector workflow against the relevant `information_schema` view to investigate further."
        );
        Self {
            workflow_name: workflow_name.into(),
            terminal_state: TerminalState::PartialError,
            failed_tool: Some(failed_tool),
            failure_reason: Some(reason),
            severity: "unknown".to_string(),
            findings: Vec::new(),
            things_not_to_do: Vec::new(),
            markdown,
        }
    }

    pub fn with_things_not_to_do(mut self, items: Vec<String>) -> Self {
        self.things_not_to_do = items;
        self
    }
}
