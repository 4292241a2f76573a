use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TLS policy selected at construction time from the host and a policy
/// hint. No fallback downgrade is ever performed once chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsMode {
    Disabled,
    RequiredVerifyCaAndIdentity,
}

const MANAGED_SERVICE_SUFFIX: &str = ".skysql.com";

/// Immutable after construction. One descriptor per logical service; the
/// pool borrows short-lived connections from it.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub default_schema: Option<String>,
    pub tls_mode: TlsMode,
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        default_schema: Option<String>,
    ) -> Self {
        let host = host.into();
        let tls_mode = Self::derive_tls_mode(&host);
        Self { host, port, user: user.into(), password: password.into(), default_schema, tls_mode }
    }

    fn derive_tls_mode(host: &str) -> TlsMode {
        if host.ends_with(MANAGED_SERVICE_SUFFIX) {
            TlsMode::RequiredVerifyCaAndIdentity
        } else {
            TlsMode::Disabled
        }
    }
}

/// a SQL request bounded by row cap and per-query timeout.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub database: Option<String>,
    pub row_cap: u32,
    pub timeout: Duration,
}

pub const DEFAULT_ROW_CAP: u32 = 100;
pub const MAX_ROW_CAP: u32 = 10_000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
pub const RESULT_BYTE_BUDGET: usize = 64 * 1024;

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            database: None,
            row_cap: DEFAULT_ROW_CAP,
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_row_cap(mut self, row_cap: u32) -> Self {
        self.row_cap = row_cap.min(MAX_ROW_CAP);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(MAX_QUERY_TIMEOUT);
        self
    }
}

/// A single row cell, typed loosely enough to cover every MySQL wire type
/// without leaking `mysql_async::Value` into callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<mysql_async::Value> for Cell {
    fn from(value: mysql_async::Value) -> Self {
        use mysql_async::Value;
        match value {
            Value::NULL => Cell::Null,
            Value::Int(v) => Cell::Int(v),
            Value::UInt(v) => Cell::UInt(v),
            Value::Float(v) => Cell::Float(v as f64),
            Value::Double(v) => Cell::Float(v),
            Value::Bytes(b) => match String::from_utf8(b.clone()) {
                Ok(s) => Cell::Text(s),
                Err(_) => Cell::Bytes(b),
            },
            other => Cell::Text(format!("{other:?}")),
        }
    }
}

impl Cell {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::UInt(v) => i64::try_from(*v).ok(),
            Cell::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// column-order-preserving header, rows as typed cells, exact
/// row count, truncation flag, execution time.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub row_count: usize,
    pub truncated: bool,
    pub execution_time: Duration,
}

impl QueryResult {
    /// Applies the row cap and the absolute byte budget, the latter
    /// estimated from the serialized cell text since the wire protocol
    /// gives us typed values rather than raw bytes.
    pub fn cap(mut self, row_cap: u32) -> Self {
        let row_cap = row_cap as usize;
        if self.rows.len() > row_cap {
            self.rows.truncate(row_cap);
            self.truncated = true;
        }

        let mut budget = RESULT_BYTE_BUDGET;
        let mut kept = Vec::with_capacity(self.rows.len());
        for row in self.rows {
            let size = estimate_row_size(&row);
            if size > budget && !kept.is_empty() {
                self.truncated = true;
                break;
            }
            budget = budget.saturating_sub(size);
            kept.push(row);
            if budget == 0 {
                self.truncated = true;
                break;
            }
        }
        self.rows = kept;
        self.row_count = self.rows.len();
        self
    }
}

fn estimate_row_size(row: &[Cell]) -> usize {
    row.iter()
        .map(|cell| match cell {
            Cell::Null => 4,
            Cell::Int(_) | Cell::UInt(_) | Cell::Float(_) => 8,
            Cell::Text(s) => s.len(),
            Cell::Bytes(b) => b.len(),
        })
        .sum()
}

/// server family/version and a best-effort primary/replica
/// role hint, memoized once per connection descriptor.
#[derive(Debug, Clone)]
pub struct ServerCapabilities {
    pub performance_instrumentation_enabled: bool,
    pub server_family: String,
    pub version: String,
    pub role_hint: RoleHint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleHint {
    Primary,
    Replica,
    Unknown,
}

/// an ordered mapping of vendor columns from `SHOW SLAVE
/// STATUS`/`SHOW ALL SLAVES STATUS`, de-duplicated by identity within a
/// single scan.
#[derive(Debug, Clone)]
pub struct ReplicaStatusRow {
    pub identity: String,
    pub columns: Vec<(String, Cell)>,
}

impl ReplicaStatusRow {
    pub fn from_columns(columns: Vec<(String, Cell)>, fallback_index: usize) -> Self {
        let identity = columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("connection_name"))
            .or_else(|| columns.iter().find(|(name, _)| name.eq_ignore_ascii_case("source_id")))
            .and_then(|(_, cell)| cell.as_text().map(str::to_string))
            .unwrap_or_else(|| format!("replica-{fallback_index}"));
        Self { identity, columns }
    }

    pub fn get(&self, name: &str) -> Option<&Cell> {
        self.columns.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, c)| c)
    }
}
