use std::collections::HashMap;

use serde::Serialize;

use crate::error::AgentResult;

use super::gateway::DbGateway;
use super::types::{Cell, QueryRequest};

/// The canonical "golden snapshot" status/variable list. Kept stable
/// across versions —
/// adding or removing entries here changes what every triage report can
/// observe.
pub const GOLDEN_STATUS_VARIABLES: &[&str] = &[
    "Uptime",
    "Threads_connected",
    "Threads_running",
    "Connections",
    "Max_used_connections",
    "Aborted_connects",
    "Aborted_clients",
    "Bytes_received",
    "Bytes_sent",
    "Questions",
    "Queries",
    "Slow_queries",
    "Open_files",
    "Open_tables",
    "Table_locks_immediate",
    "Table_locks_waited",
    "Created_tmp_disk_tables",
    "Connection_errors_max_connections",
    "Innodb_buffer_pool_pages_data",
    "Innodb_buffer_pool_pages_dirty",
    "Innodb_buffer_pool_pages_free",
    "Innodb_buffer_pool_read_requests",
    "Innodb_buffer_pool_reads",
    "Innodb_row_lock_time",
    "Innodb_row_lock_waits",
    "Innodb_history_list_length",
];

pub const GOLDEN_GLOBAL_VARIABLES: &[&str] = &["have_ssl", "performance_schema"];

/// Health snapshot: a named mapping of category to metric
/// bundle, sampled once at the start of incident triage.
#[derive(Debug, Clone, Serialize, Default)]
pub struct HealthSnapshot {
    pub connections: HashMap<String, String>,
    pub resource_pressure: ResourcePressure,
    pub locks_and_transactions: HashMap<String, String>,
    pub query_activity: HashMap<String, String>,
    pub replication: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResourcePressure {
    pub status_variables: HashMap<String, String>,
    /// Populated only when a managed-service id and credentials are
    /// present; `None` means "observability not
    /// configured", which the triage report must say explicitly.
    pub external_cpu_percent: Option<f64>,
    pub external_disk_utilization_percent: Option<f64>,
}

/// Builds the health snapshot from `SHOW GLOBAL STATUS`/`SHOW GLOBAL
/// VARIABLES`, filtered to `GOLDEN_STATUS_VARIABLES`. External enrichment
/// (CPU%, disk%) is applied by the caller (incident-triage workflow), not
/// here, since it depends on SkySQL credentials this module has no access to.
pub async fn build_health_snapshot(gateway: &DbGateway) -> AgentResult<HealthSnapshot> {
    let status = fetch_global_status(gateway).await?;

    let mut connections = HashMap::new();
    let mut locks_and_transactions = HashMap::new();
    let mut query_activity = HashMap::new();
    let mut other = HashMap::new();

    for (name, value) in status {
        match name.as_str() {
            "Threads_connected" | "Threads_running" | "Connections" | "Max_used_connections"
            | "Aborted_connects" | "Aborted_clients" | "Connection_errors_max_connections" => {
                connections.insert(name, value);
            }
            "Table_locks_immediate" | "Table_locks_waited" | "Innodb_row_lock_time"
            | "Innodb_row_lock_waits" | "Innodb_history_list_length" => {
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
        resource_pressure: ResourcePressure { status_variables: other, external_cpu_percent: None, external_disk_utilization_percent: None },
        locks_and_transactions,
        query_activity,
        replication: None,
    })
}

async fn fetch_global_status(gateway: &DbGateway) -> AgentResult<HashMap<String, String>> {
    let result = gateway.run_readonly(QueryRequest::new("SHOW GLOBAL STATUS").with_row_cap(1000)).await?;
    let mut out = HashMap::new();
    for row in result.rows {
        if row.len() < 2 {
            continue;
        }
        let name = row[0].as_text().unwrap_or_default().to_string();
        if GOLDEN_STATUS_VARIABLES.contains(&name.as_str()) {
            let value = cell_to_string(&row[1]);
            out.insert(name, value);
        }
    }
    Ok(out)
}

fn cell_to_string(cell: &Cell) -> String {
    match cell {
        Cell::Text(s) => s.clone(),
        Cell::Int(v) => v.to_string(),
        Cell::UInt(v) => v.to_string(),
        Cell::Float(v) => v.to_string(),
        Cell::Null => String::new(),
        Cell::Bytes(b) => String::from_utf8_lossy(b).to_string(),
    }
}

