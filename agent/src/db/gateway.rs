use std::time::{Duration, Instant};

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Row};
use tokio::sync::Mutex;

use crate::error::{AgentError, AgentResult};

use super::types::{
    Cell, ConnectionDescriptor, QueryRequest, QueryResult, ReplicaStatusRow, RoleHint,
    ServerCapabilities, TlsMode,
};

const ALLOWED_KEYWORDS: [&str; 5] = ["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"];
pub const DEFAULT_PROBE_COUNT: u32 = 10;
pub const MAX_PROBE_COUNT: u32 = 20;
const CONNECT_DEADLINE: Duration = Duration::from_secs(5);

/// Pooled, read-only MariaDB/MySQL access: typed result deserialization,
/// graceful fallback-and-log on transient errors, a memoized capability
/// probe.
pub struct DbGateway {
    descriptor: ConnectionDescriptor,
    pool: Pool,
    capabilities: Mutex<Option<ServerCapabilities>>,
}

impl DbGateway {
    pub fn new(descriptor: ConnectionDescriptor) -> AgentResult<Self> {
        let opts = build_opts(&descriptor)?;
        let pool = Pool::new(opts);
        Ok(Self { descriptor, pool, capabilities: Mutex::new(None) })
    }

    /// Validates query shape, borrows a pooled connection under a 5s
    /// connect-acquire deadline distinct from the query's own execution
    /// deadline, sets the session-level statement timeout, executes, and
    /// caps the result.
    pub async fn run_readonly(&self, request: QueryRequest) -> AgentResult<QueryResult> {
        validate_query_shape(&request.sql)?;

        let timeout = request.timeout.min(super::types::MAX_QUERY_TIMEOUT);
        let conn = match tokio::time::timeout(CONNECT_DEADLINE, self.pool.get_conn()).await {
            Ok(conn) => conn.map_err(classify_conn_error)?,
            Err(_) => return Err(AgentError::Timeout(CONNECT_DEADLINE)),
        };

        let fut = self.execute(conn, &request, timeout);
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(timeout)),
        }
    }

    async fn execute(&self, mut conn: Conn, request: &QueryRequest, timeout: Duration) -> AgentResult<QueryResult> {
        prepare_session(&mut conn, request.database.as_deref(), timeout).await?;

        let started = Instant::now();
        let rows: Vec<Row> = match conn.query(&request.sql).await {
            Ok(rows) => rows,
            Err(e) => {
                // a connection that errored mid-query is never returned to the
                // pool in a usable state
                drop(conn);
                return Err(classify_conn_error(e));
            }
        };
        let execution_time = started.elapsed();

        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns_ref().iter().map(|c| c.name_str().to_string()).collect())
            .unwrap_or_default();

        let typed_rows: Vec<Vec<Cell>> = rows
            .into_iter()
            .map(|mut row| {
                let n = row.len();
                (0..n).map(|i| row.take::<mysql_async::Value, usize>(i).map(Cell::from).unwrap_or(Cell::Null)).collect()
            })
            .collect();

        let row_count = typed_rows.len();
        let result = QueryResult { columns, rows: typed_rows, row_count, truncated: false, execution_time };
        Ok(result.cap(request.row_cap))
    }

    /// Exploits a connection-round-robin load balancer to reach multiple
    /// replicas: opens `probe_count` fresh physical connections (bypassing
    /// the shared pool, which would otherwise reuse one backend) and
    /// executes the same query on each.
    pub async fn run_readonly_probe(
        &self,
        request: QueryRequest,
        probe_count: u32,
    ) -> AgentResult<(Vec<ReplicaStatusRow>, String)> {
        validate_query_shape(&request.sql)?;
        let probe_count = probe_count.clamp(1, MAX_PROBE_COUNT);
        let opts = build_opts(&self.descriptor)?;

        let mut successes = 0u32;
        let mut seen = std::collections::HashSet::new();
        let mut rows = Vec::new();

        for i in 0..probe_count {
            match self.probe_once(&opts, &request).await {
                Ok(probe_rows) => {
                    successes += 1;
                    for (idx, row) in probe_rows.into_iter().enumerate() {
                        let replica = ReplicaStatusRow::from_columns(row, (i as usize) * 1000 + idx);
                        if seen.insert(replica.identity.clone()) {
                            rows.push(replica);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(probe = i, error = %e, "probe failed, skipping");
                }
            }
        }

        if successes == 0 && probe_count > 0 {
            tracing::warn!("all {probe_count} probes failed");
        }

        let note = format!(
            "probe scan is non-deterministic under load-balanced routing; up to {probe_count} attempts were made, expect at most 5 distinct replicas in the managed-service setting"
        );
        Ok((rows, note))
    }

    async fn probe_once(
        &self,
        opts: &Opts,
        request: &QueryRequest,
    ) -> AgentResult<Vec<Vec<(String, Cell)>>> {
        let mut conn = tokio::time::timeout(CONNECT_DEADLINE, Conn::new(opts.clone()))
            .await
            .map_err(|_| AgentError::Timeout(CONNECT_DEADLINE))?
            .map_err(classify_conn_error)?;

        // autocommit so each probe statement is its own unit of work
        conn.query_drop("SET autocommit = 1").await.map_err(classify_conn_error)?;
        if let Some(db) = &request.database {
            conn.query_drop(format!("USE `{}`", db.replace('`', ""))).await.map_err(classify_conn_error)?;
        }

        let rows: Vec<Row> = conn.query(&request.sql).await.map_err(classify_conn_error)?;
        let out = rows
            .into_iter()
            .map(|mut row| {
                let names: Vec<String> = row.columns_ref().iter().map(|c| c.name_str().to_string()).collect();
                names
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| {
                        let cell = row.take::<mysql_async::Value, usize>(i).map(Cell::from).unwrap_or(Cell::Null);
                        (name, cell)
                    })
                    .collect()
            })
            .collect();
        Ok(out)
    }

    /// Probes and memoizes server capabilities once per descriptor. The
    /// memo is invalidated only by `close()`.
    pub async fn server_capabilities(&self) -> AgentResult<ServerCapabilities> {
        let mut guard = self.capabilities.lock().await;
        if let Some(caps) = &*guard {
            return Ok(caps.clone());
        }

        let mut conn = self.pool.get_conn().await.map_err(classify_conn_error)?;

        let version: Option<String> = conn
            .query_first("SELECT VERSION()")
            .await
            .map_err(classify_conn_error)?;
        let version = version.unwrap_or_else(|| "unknown".to_string());
        let server_family = if version.to_lowercase().contains("mariadb") { "MariaDB" } else { "MySQL" }.to_string();

        // the instrumentation probe SQL is not stable across backend
        // versions; any failure degrades to "disabled", no retry 
        let performance_instrumentation_enabled =
            conn.query_first::<String, _>("SELECT @@performance_schema").await.ok().flatten().as_deref() == Some("1");

        let read_only: Option<String> = conn.query_first("SELECT @@read_only").await.unwrap_or(None);
        let role_hint = match read_only.as_deref() {
            Some("1") => RoleHint::Replica,
            Some("0") => RoleHint::Primary,
            _ => RoleHint::Unknown,
        };

        let caps = ServerCapabilities { performance_instrumentation_enabled, server_family, version, role_hint };
        *guard = Some(caps.clone());
        Ok(caps)
    }

    pub async fn close(&self) {
        self.pool.clone().disconnect().await.ok();
        let mut guard = self.capabilities.lock().await;
        *guard = None;
    }
}

async fn prepare_session(conn: &mut Conn, database: Option<&str>, timeout: Duration) -> AgentResult<()> {
    conn.query_drop("SET NAMES utf8mb4").await.map_err(classify_conn_error)?;
    conn.query_drop("SET autocommit = 1").await.map_err(classify_conn_error)?;
    let millis = timeout.as_millis();
    // MAX_EXECUTION_TIME is MySQL/Percona syntax in milliseconds; MariaDB's
    // equivalent is max_statement_time in seconds. Set both; an unsupported
    // one is silently ignored by most servers via best-effort SET.
    let _ = conn.query_drop(format!("SET SESSION MAX_EXECUTION_TIME = {millis}")).await;
    let secs = timeout.as_secs_f64();
    let _ = conn.query_drop(format!("SET SESSION max_statement_time = {secs}")).await;
    if let Some(db) = database {
        conn.query_drop(format!("USE `{}`", db.replace('`', ""))).await.map_err(classify_conn_error)?;
    }
    Ok(())
}

const POOL_MIN_CONNECTIONS: usize = 2;
const POOL_MAX_CONNECTIONS: usize = 20;
const POOL_INACTIVE_CONNECTION_TTL: Duration = Duration::from_secs(300);
const POOL_TTL_CHECK_INTERVAL: Duration = Duration::from_secs(60);

fn build_opts(descriptor: &ConnectionDescriptor) -> AgentResult<Opts> {
    let constraints = mysql_async::PoolConstraints::new(POOL_MIN_CONNECTIONS, POOL_MAX_CONNECTIONS)
        .ok_or_else(|| AgentError::configuration("invalid pool min/max connection constraints"))?;
    let pool_opts = mysql_async::PoolOpts::default()
        .with_constraints(constraints)
        .with_inactive_connection_ttl(POOL_INACTIVE_CONNECTION_TTL)
        .with_ttl_check_interval(POOL_TTL_CHECK_INTERVAL);

    let mut builder = OptsBuilder::default()
        .ip_or_hostname(descriptor.host.clone())
        .tcp_port(descriptor.port)
        .user(Some(descriptor.user.clone()))
        .pass(Some(descriptor.password.clone()))
        .pool_opts(pool_opts);

    if let Some(schema) = &descriptor.default_schema {
        builder = builder.db_name(Some(schema.clone()));
    }

    if descriptor.tls_mode == TlsMode::RequiredVerifyCaAndIdentity {
        builder = builder.ssl_opts(Some(mysql_async::SslOpts::default()));
    }

    Ok(Opts::from(builder))
}

/// Strips comments and whitespace, rejects anything whose leading keyword
/// is not SELECT/SHOW/DESCRIBE/DESC/EXPLAIN.
pub fn validate_query_shape(sql: &str) -> AgentResult<()> {
    let stripped = strip_comments(sql);
    let first_word = stripped
        .trim()
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .unwrap_or("")
        .to_uppercase();

    if ALLOWED_KEYWORDS.contains(&first_word.as_str()) {
        Ok(())
    } else {
        Err(AgentError::unsafe_query(format!("statement does not start with an allowed read-only keyword: {sql}")))
    }
}

fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '#' => {
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn classify_conn_error(err: mysql_async::Error) -> AgentError {
    use mysql_async::Error as E;
    match &err {
        E::Driver(_) | E::Io(_) => AgentError::connection_lost(err.to_string()),
        E::Server(server_err) => {
            let msg = server_err.message.to_lowercase();
            if msg.contains("access denied") {
                AgentError::AuthFailed
            } else if msg.contains("unknown database") {
                AgentError::schema_missing(server_err.message.clone())
            } else {
                AgentError::backend_error(server_err.code as i32, server_err.message.clone())
            }
        }
        _ => AgentError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_select() {
        assert!(validate_query_shape("  SELECT 1").is_ok());
    }

    #[test]
    fn accepts_after_comment_strip() {
        assert!(validate_query_shape("-- comment\n/* block */ SHOW TABLES").is_ok());
    }

    #[test]
    fn rejects_delete() {
        let err = validate_query_shape("DELETE FROM users").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsafeQuery);
    }

    #[test]
    fn rejects_comment_smuggled_delete() {
        let err = validate_query_shape("/* SELECT */ DELETE FROM users").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnsafeQuery);
    }
}
