//! Thin `clap`-derived driver over the library's `Orchestrator`/workflow
//! entry points — one subcommand per named workflow plus a free-form
//! query routed through intent detection.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use db_agents::config::Config;
use db_agents::db::DbGateway;
use db_agents::llm::LlmClient;
use db_agents::logs::LogIngestor;
use db_agents::orchestrator::Orchestrator;
use db_agents::telemetry::TelemetrySink;
use db_agents::tools::{
    ExternalMetricsTool, ExtractPatternsTool, FetchRemoteLogTool, RunReadonlyProbeTool, RunReadonlyQueryTool, ServerCapabilitiesTool, TailLocalLogTool,
    ToolRegistry,
};

#[derive(Parser)]
#[command(name = "db-agents", about = "Diagnostic agent suite for MariaDB/MySQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an arbitrary read-only SQL statement.
    DbInspector {
        sql: String,
        #[arg(long, default_value_t = db_agents::db::DEFAULT_ROW_CAP)]
        row_cap: u32,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
    /// Aggregate and classify the slowest query patterns.
    SlowQuery {
        #[arg(long, default_value_t = 1)]
        window_hours: u32,
        #[arg(long, default_value_t = 8)]
        max_patterns: u32,
        #[arg(long)]
        slow_log_path: Option<String>,
    },
    /// Inspect currently running sessions and lock blockers.
    RunningQuery {
        #[arg(long, default_value_t = 1.0)]
        min_execution_secs: f64,
        #[arg(long, default_value_t = false)]
        include_sleeping: bool,
        #[arg(long, default_value_t = 20)]
        max_queries: u32,
    },
    /// Check replica health against the source.
    ReplicationHealth {
        #[arg(long, default_value_t = 10)]
        probe_count: u32,
    },
    /// Correlate a health snapshot with recent error-log patterns.
    IncidentTriage {
        #[arg(long)]
        error_log_path: Option<String>,
        #[arg(long)]
        managed_service_id: Option<String>,
        #[arg(long, default_value_t = 20)]
        max_error_patterns: u32,
        #[arg(long, default_value_t = 5_000)]
        max_log_lines: u32,
    },
    /// Route a free-form request to the workflow it best matches.
    Orchestrator { query: String },
}

#[tokio::main]
async fn main() {
    let exit_code = run().await.map(|_| 0).unwrap_or_else(|e| {
        eprintln!("error: {e}");
        e.exit_code()
    });
    std::process::exit(exit_code);
}

async fn run() -> db_agents::error::AgentResult<()> {
    init_tracing();

    let config = Config::from_env()?;

    let descriptor = db_agents::db::ConnectionDescriptor::new(
        config.database.host.clone(),
        config.database.port,
        config.database.user.clone(),
        config.database.password.clone(),
        config.database.database.clone(),
    );
    let gateway = Arc::new(DbGateway::new(descriptor)?);
    let ingestor = Arc::new(LogIngestor::new());

    let telemetry = TelemetrySink::new();
    let mut tools = ToolRegistry::new(telemetry.clone());
    tools.register(Arc::new(RunReadonlyQueryTool::new(gateway.clone())));
    tools.register(Arc::new(RunReadonlyProbeTool::new(gateway.clone())));
    tools.register(Arc::new(ServerCapabilitiesTool::new(gateway.clone())));
    tools.register(Arc::new(TailLocalLogTool::new(ingestor.clone())));
    tools.register(Arc::new(FetchRemoteLogTool::new(ingestor.clone(), config.skysql.clone())));
    tools.register(Arc::new(ExternalMetricsTool::new(ingestor.clone(), config.skysql.clone())));
    tools.register(Arc::new(ExtractPatternsTool));

    let reasoning = Arc::new(LlmClient::new(config.openai.clone()));
    let orchestrator = Orchestrator::new(Arc::new(tools), reasoning, telemetry);

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::DbInspector { sql, row_cap, timeout_secs } => {
            orchestrator.run_workflow("db-inspector", serde_json::json!({ "sql": sql, "row_cap": row_cap, "timeout_secs": timeout_secs })).await?
        }
        Command::SlowQuery { window_hours, max_patterns, slow_log_path } => {
            orchestrator
                .run_workflow("slow-query", serde_json::json!({ "window_hours": window_hours, "max_patterns": max_patterns, "slow_log_path": slow_log_path }))
                .await?
        }
        Command::RunningQuery { min_execution_secs, include_sleeping, max_queries } => {
            orchestrator
                .run_workflow(
                    "running-query",
                    serde_json::json!({ "min_execution_secs": min_execution_secs, "include_sleeping": include_sleeping, "max_queries": max_queries }),
                )
                .await?
        }
        Command::ReplicationHealth { probe_count } => {
            orchestrator.run_workflow("replication-health", serde_json::json!({ "probe_count": probe_count })).await?
        }
        Command::IncidentTriage { error_log_path, managed_service_id, max_error_patterns, max_log_lines } => {
            orchestrator
                .run_workflow(
                    "incident-triage",
                    serde_json::json!({
                        "error_log_path": error_log_path,
                        "managed_service_id": managed_service_id,
                        "max_error_patterns": max_error_patterns,
                        "max_log_lines": max_log_lines,
                    }),
                )
                .await?
        }
        Command::Orchestrator { query } => orchestrator.handle_request(&query).await?,
    };

    println!("{}", outcome.markdown);
    Ok(())
}

/// An `EnvFilter` respecting `RUST_LOG`, logs written to a daily-rolling
/// file under `./logs` so stdout stays reserved for the report markdown.
fn init_tracing() {
    let file_appender = tracing_appender::rolling::daily("./logs", "db-agents.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard);

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();
}
