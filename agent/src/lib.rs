//! db-agents: a bounded, tool-mediated diagnostic agent suite for
//! MariaDB/MySQL. Wires the components behind a
//! small public surface: build a `Config`, assemble a `ToolRegistry`, hand
//! it to an `Orchestrator`, run a workflow by name or route a free-form
//! request.

pub mod config;
pub mod db;
pub mod error;
pub mod guardrails;
pub mod llm;
pub mod logs;
pub mod orchestrator;
pub mod patterns;
pub mod report;
pub mod telemetry;
pub mod tools;
pub mod workflows;
