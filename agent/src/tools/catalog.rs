//! Concrete tool implementations wrapping the DB gateway and log
//! ingestion + pattern extraction behind the `Tool` contract.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SkySqlConfig;
use crate::db::{Cell, DbGateway, QueryRequest};
use crate::error::{AgentError, AgentResult};
use crate::logs::LogIngestor;
use crate::patterns;

use super::base::{Capability, ParameterKind, ParameterSchema, Tool};

fn cell_to_json(cell: &Cell) -> Value {
    match cell {
        Cell::Null => Value::Null,
        Cell::Int(v) => json!(v),
        Cell::UInt(v) => json!(v),
        Cell::Float(v) => json!(v),
        Cell::Text(s) => json!(s),
        Cell::Bytes(b) => json!(String::from_utf8_lossy(b)),
    }
}

fn get_str<'a>(args: &'a Value, name: &str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or_default()
}

fn get_u32(args: &Value, name: &str, default: u32) -> u32 {
    args.get(name).and_then(Value::as_u64).map(|v| v as u32).unwrap_or(default)
}

/// `run_readonly_query`: the general-purpose read-only access tool. Used directly
/// by the db-inspector workflow and internally by every other workflow.
pub struct RunReadonlyQueryTool {
    gateway: Arc<DbGateway>,
}

impl RunReadonlyQueryTool {
    pub fn new(gateway: Arc<DbGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for RunReadonlyQueryTool {
    fn name(&self) -> &'static str {
        "run_readonly_query"
    }

    fn description(&self) -> &'static str {
        "Executes a single read-only SQL statement (SELECT/SHOW/DESCRIBE/EXPLAIN) and returns its rows."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("sql", ParameterKind::String),
            ParameterSchema::optional("row_cap", ParameterKind::Integer, json!(crate::db::DEFAULT_ROW_CAP)),
            ParameterSchema::optional("timeout_secs", ParameterKind::Integer, json!(10)),
            ParameterSchema::optional("database", ParameterKind::String, json!("")),
        ]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsDb])
    }

    fn timeout(&self) -> Duration {
        crate::db::MAX_QUERY_TIMEOUT
    }

    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let sql = get_str(&args, "sql");
        let row_cap = get_u32(&args, "row_cap", crate::db::DEFAULT_ROW_CAP);
        let timeout = Duration::from_secs(args.get("timeout_secs").and_then(Value::as_u64).unwrap_or(10));
        let database = get_str(&args, "database");

        let mut request = QueryRequest::new(sql).with_row_cap(row_cap).with_timeout(timeout);
        if !database.is_empty() {
            request = request.with_database(database);
        }

        let result = self.gateway.run_readonly(request).await?;
        Ok(json!({
            "columns": result.columns,
            "rows": result.rows.iter().map(|r| r.iter().map(cell_to_json).collect::<Vec<_>>()).collect::<Vec<_>>(),
            "row_count": result.row_count,
            "truncated": result.truncated,
            "execution_time_ms": result.execution_time.as_millis() as u64,
        }))
    }
}

/// `run_readonly_probe`: the replica round-robin probe.
pub struct RunReadonlyProbeTool {
    gateway: Arc<DbGateway>,
}

impl RunReadonlyProbeTool {
    pub fn new(gateway: Arc<DbGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for RunReadonlyProbeTool {
    fn name(&self) -> &'static str {
        "run_readonly_probe"
    }

    fn description(&self) -> &'static str {
        "Executes a read-only statement repeatedly on fresh connections to reach multiple replicas behind a round-robin proxy."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("sql", ParameterKind::String),
            ParameterSchema::optional("probe_count", ParameterKind::Integer, json!(crate::db::DEFAULT_PROBE_COUNT)),
        ]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsDb])
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let sql = get_str(&args, "sql");
        let probe_count = get_u32(&args, "probe_count", crate::db::DEFAULT_PROBE_COUNT);
        let (rows, note) = self.gateway.run_readonly_probe(QueryRequest::new(sql), probe_count).await?;
        Ok(json!({
            "replicas": rows.iter().map(|r| {
                let mut obj = serde_json::Map::new();
                obj.insert("identity".to_string(), json!(r.identity));
                for (name, cell) in &r.columns {
                    obj.insert(name.clone(), cell_to_json(cell));
                }
                Value::Object(obj)
            }).collect::<Vec<_>>(),
            "note": note,
        }))
    }
}

/// `server_capabilities`: memoized feature probing.
pub struct ServerCapabilitiesTool {
    gateway: Arc<DbGateway>,
}

impl ServerCapabilitiesTool {
    pub fn new(gateway: Arc<DbGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for ServerCapabilitiesTool {
    fn name(&self) -> &'static str {
        "server_capabilities"
    }

    fn description(&self) -> &'static str {
        "Reports server family/version, whether performance instrumentation is enabled, and a primary/replica role hint."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsDb])
    }

    async fn execute(&self, _args: Value) -> AgentResult<Value> {
        let caps = self.gateway.server_capabilities().await?;
        Ok(json!({
            "performance_instrumentation_enabled": caps.performance_instrumentation_enabled,
            "server_family": caps.server_family,
            "version": caps.version,
            "role_hint": format!("{:?}", caps.role_hint),
        }))
    }
}

/// `tail_local_log`: the local-file log path.
pub struct TailLocalLogTool {
    ingestor: Arc<LogIngestor>,
}

impl TailLocalLogTool {
    pub fn new(ingestor: Arc<LogIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl Tool for TailLocalLogTool {
    fn name(&self) -> &'static str {
        "tail_local_log"
    }

    fn description(&self) -> &'static str {
        "Reads the last N lines of a local log file."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("path", ParameterKind::String),
            ParameterSchema::optional("max_lines", ParameterKind::Integer, json!(crate::logs::DEFAULT_MAX_LINES as u64)),
        ]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsLog])
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let path = get_str(&args, "path");
        let max_lines = args.get("max_lines").and_then(Value::as_u64).unwrap_or(crate::logs::DEFAULT_MAX_LINES as u64) as usize;
        let bytes = self.ingestor.tail_local(path, max_lines).await?;
        Ok(json!({ "text": String::from_utf8_lossy(&bytes).to_string() }))
    }
}

/// `fetch_remote_log`: the managed-observability log path. `NotConfigured`
/// when SkySQL credentials are absent.
pub struct FetchRemoteLogTool {
    ingestor: Arc<LogIngestor>,
    skysql: Option<SkySqlConfig>,
}

impl FetchRemoteLogTool {
    pub fn new(ingestor: Arc<LogIngestor>, skysql: Option<SkySqlConfig>) -> Self {
        Self { ingestor, skysql }
    }
}

#[async_trait]
impl Tool for FetchRemoteLogTool {
    fn name(&self) -> &'static str {
        "fetch_remote_log"
    }

    fn description(&self) -> &'static str {
        "Downloads error-log entries for a time range from the managed observability endpoint."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("from_time", ParameterKind::String),
            ParameterSchema::required("to_time", ParameterKind::String),
        ]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsLog])
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let skysql = self.skysql.as_ref().ok_or(AgentError::NotConfigured)?;
        let from_time = chrono::DateTime::parse_from_rfc3339(get_str(&args, "from_time"))
            .map_err(|e| AgentError::bad_args(e.to_string()))?
            .with_timezone(&chrono::Utc);
        let to_time = chrono::DateTime::parse_from_rfc3339(get_str(&args, "to_time"))
            .map_err(|e| AgentError::bad_args(e.to_string()))?
            .with_timezone(&chrono::Utc);
        let bytes = self.ingestor.fetch_remote(skysql, from_time, to_time).await?;
        Ok(json!({ "text": String::from_utf8_lossy(&bytes).to_string() }))
    }
}

const EXTERNAL_METRIC_NAMES: [&str; 3] = ["cpu", "disk_data", "disk_logs"];

/// `external_metrics`: a single point-in-time CPU/disk utilization reading
/// from the managed observability endpoint. `NotConfigured` when SkySQL
/// credentials are absent.
pub struct ExternalMetricsTool {
    ingestor: Arc<LogIngestor>,
    skysql: Option<SkySqlConfig>,
}

impl ExternalMetricsTool {
    pub fn new(ingestor: Arc<LogIngestor>, skysql: Option<SkySqlConfig>) -> Self {
        Self { ingestor, skysql }
    }
}

#[async_trait]
impl Tool for ExternalMetricsTool {
    fn name(&self) -> &'static str {
        "external_metrics"
    }

    fn description(&self) -> &'static str {
        "Fetches a CPU or disk utilization reading from the managed observability endpoint."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![ParameterSchema::required("metric", ParameterKind::String).with_enum(EXTERNAL_METRIC_NAMES.iter().map(|m| json!(m)).collect())]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::ReadsLog])
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let skysql = self.skysql.as_ref().ok_or(AgentError::NotConfigured)?;
        let metric = get_str(&args, "metric");
        if !EXTERNAL_METRIC_NAMES.contains(&metric) {
            return Err(AgentError::bad_args(format!("unknown metric: {metric}")));
        }
        let value = self.ingestor.fetch_metric(skysql, metric).await?;
        Ok(json!({ "metric": metric, "value": value }))
    }
}

/// `extract_patterns`: the pure normalization/grouping pipeline exposed
/// as a tool so workflows invoke it uniformly alongside DB/log tools.
pub struct ExtractPatternsTool;

#[async_trait]
impl Tool for ExtractPatternsTool {
    fn name(&self) -> &'static str {
        "extract_patterns"
    }

    fn description(&self) -> &'static str {
        "Normalizes raw log text into a ranked, capped list of severity-classified patterns."
    }

    fn parameters(&self) -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("text", ParameterKind::String),
            ParameterSchema::optional("max_patterns", ParameterKind::Integer, json!(patterns::DEFAULT_MAX_PATTERNS as u64)),
        ]
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::Pure])
    }

    async fn execute(&self, args: Value) -> AgentResult<Value> {
        let text = get_str(&args, "text");
        let max_patterns = args.get("max_patterns").and_then(Value::as_u64).unwrap_or(patterns::DEFAULT_MAX_PATTERNS as u64) as usize;
        let patterns = patterns::extract(text, max_patterns);
        Ok(json!(patterns))
    }
}
