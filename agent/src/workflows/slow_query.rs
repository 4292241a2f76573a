use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::report::{AgentReport, Finding};

use super::{Workflow, WorkflowContext};

pub const WORKFLOW_NAME: &str = "slow-query";

const DEFAULT_WINDOW_HOURS: u32 = 1;
const MAX_WINDOW_HOURS: u32 = 168;
const DEFAULT_MAX_PATTERNS: u32 = 8;
const MAX_MAX_PATTERNS: u32 = 30;

#[derive(Debug, Clone, Deserialize)]
pub struct SlowQueryParams {
    #[serde(default = "default_window")]
    pub window_hours: u32,
    #[serde(default = "default_max_patterns")]
    pub max_patterns: u32,
    #[serde(default)]
    pub slow_log_path: Option<String>,
}

fn default_window() -> u32 {
    DEFAULT_WINDOW_HOURS
}

fn default_max_patterns() -> u32 {
    DEFAULT_MAX_PATTERNS
}

struct SlowPattern {
    digest_sql: String,
    count: u64,
    total_duration_secs: f64,
    avg_duration_secs: f64,
}

enum Bound {
    Cpu,
    Io,
    Lock,
    Unknown,
}

impl Bound {
    fn label(&self) -> &'static str {
        match self {
            Bound::Cpu => "CPU-bound",
            Bound::Io => "I/O-bound",
            Bound::Lock => "lock-bound",
            Bound::Unknown => "unclassified",
        }
    }
}

/// Each top pattern goes through a fixed EXPLAIN-then-classify pipeline
/// rather than free-form tool selection.
pub struct SlowQueryWorkflow;

#[async_trait]
impl Workflow for SlowQueryWorkflow {
    fn name(&self) -> &'static str {
        WORKFLOW_NAME
    }

    async fn run(&self, ctx: &WorkflowContext, params: Value) -> AgentReport {
        let params: SlowQueryParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return AgentReport::partial_error(WORKFLOW_NAME, "parameters", e.to_string()),
        };
        let window_hours = params.window_hours.clamp(1, MAX_WINDOW_HOURS);
        let max_patterns = params.max_patterns.clamp(1, MAX_MAX_PATTERNS);

        let using_table = params.slow_log_path.is_none();

        let patterns = if let Some(path) = &params.slow_log_path {
            match aggregate_from_file(ctx, path).await {
                Ok(p) => p,
                Err(e) => return super::tool_error_report(WORKFLOW_NAME, "tail_local_log", e),
            }
        } else {
            match aggregate_from_table(ctx, window_hours).await {
                Ok(p) => p,
                Err(e) => return super::tool_error_report(WORKFLOW_NAME, "run_readonly_query", e),
            }
        };

        let mut ranked = patterns;
        ranked.sort_by(|a, b| b.total_duration_secs.partial_cmp(&a.total_duration_secs).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(max_patterns as usize);

        let mut findings = Vec::new();
        for pattern in &ranked {
            let bound = classify(ctx, pattern).await;
            let mut indicators = vec![
                format!("count: {}", pattern.count),
                format!("avg duration: {:.3}s", pattern.avg_duration_secs),
                format!("total duration: {:.3}s", pattern.total_duration_secs),
                format!("classification: {}", bound.label()),
            ];

            let mut suggested_actions = vec![match bound {
                Bound::Cpu => "Review the execution plan for full scans and consider an index on the filter/sort columns.".to_string(),
                Bound::Io => "Check buffer-pool hit ratio and disk-bound I/O; consider a covering index.".to_string(),
                Bound::Lock => "Investigate concurrent writers on the same rows; consider shorter transactions.".to_string(),
                Bound::Unknown => "Re-run with instrumentation enabled for a confident classification.".to_string(),
            }];

            if let Some(rewrite) = fulltext_suggestion(ctx, &pattern.digest_sql).await {
                indicators.push("leading-wildcard LIKE predicate detected".to_string());
                suggested_actions.push(rewrite);
            }

            findings.push(Finding { title: pattern.digest_sql.clone(), indicators, suggested_actions });
        }

        let markdown = render_markdown(using_table, window_hours, &findings);
        let severity = if findings.is_empty() { "info" } else { "warning" };
        AgentReport::complete(WORKFLOW_NAME, severity, findings, markdown)
    }
}

async fn aggregate_from_table(ctx: &WorkflowContext, window_hours: u32) -> crate::error::AgentResult<Vec<SlowPattern>> {
    let sql = format!(
        "SELECT DIGEST_TEXT, COUNT_STAR, SUM_TIMER_WAIT, AVG_TIMER_WAIT \
         FROM performance_schema.events_statements_summary_by_digest \
         WHERE LAST_SEEN >= NOW() - INTERVAL {window_hours} HOUR \
         ORDER BY SUM_TIMER_WAIT DESC LIMIT 200"
    );
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": sql })).await?;
    let rows = result["rows"].as_array().cloned().unwrap_or_default();
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let cells = row.as_array()?;
            let digest_sql = cells.first()?.as_str()?.to_string();
            let count = cells.get(1).and_then(Value::as_u64).unwrap_or(0);
            // performance_schema timer units are picoseconds; convert to seconds.
            let total_picos = cells.get(2).and_then(Value::as_f64).unwrap_or(0.0);
            let avg_picos = cells.get(3).and_then(Value::as_f64).unwrap_or(0.0);
            Some(SlowPattern {
                digest_sql,
                count,
                total_duration_secs: total_picos / 1e12,
                avg_duration_secs: avg_picos / 1e12,
            })
        })
        .collect())
}

async fn aggregate_from_file(ctx: &WorkflowContext, path: &str) -> crate::error::AgentResult<Vec<SlowPattern>> {
    let tail = ctx.call_tool("tail_local_log", json!({ "path": path, "max_lines": 200_000 })).await?;
    let text = tail["text"].as_str().unwrap_or_default();
    Ok(parse_slow_log_text(text))
}

static QUERY_TIME_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

fn parse_slow_log_text(text: &str) -> Vec<SlowPattern> {
    let query_time_re = QUERY_TIME_RE.get_or_init(|| Regex::new(r"(?i)^#\s*Query_time:\s*([0-9.]+)").unwrap());

    let mut buckets: HashMap<String, (u64, f64)> = HashMap::new();
    let mut pending_duration: Option<f64> = None;

    for line in text.lines() {
        if let Some(caps) = query_time_re.captures(line) {
            pending_duration = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            continue;
        }
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if let Some(duration) = pending_duration.take() {
            let fingerprint = crate::patterns::normalize_line(line);
            let bucket = buckets.entry(fingerprint).or_insert((0, 0.0));
            bucket.0 += 1;
            bucket.1 += duration;
        }
    }

    buckets
        .into_iter()
        .map(|(digest_sql, (count, total))| SlowPattern {
            digest_sql,
            count,
            total_duration_secs: total,
            avg_duration_secs: if count > 0 { total / count as f64 } else { 0.0 },
        })
        .collect()
}

async fn classify(ctx: &WorkflowContext, pattern: &SlowPattern) -> Bound {
    let explain_sql = format!("EXPLAIN FORMAT=JSON {}", pattern.digest_sql);
    let explain = match ctx.call_tool("run_readonly_query", json!({ "sql": explain_sql })).await {
        Ok(v) => v,
        Err(_) => return Bound::Unknown,
    };

    let plan_text = explain["rows"].to_string();
    let caps = match ctx.call_tool("server_capabilities", json!({})).await {
        Ok(v) => v,
        Err(_) => return heuristic_bound(&plan_text),
    };
    let instrumented = caps["performance_instrumentation_enabled"].as_bool().unwrap_or(false);
    if instrumented {
        if let Some(bound) = classify_from_digest_metrics(ctx, &pattern.digest_sql).await {
            return bound;
        }
    }
    heuristic_bound(&plan_text)
}

/// Pulls per-digest lock-wait time, rows-examined/sent, and the
/// no-index-used flag from `events_statements_summary_by_digest` and
/// classifies on those counters directly, bypassing the EXPLAIN-plan
/// heuristic entirely. Returns `None` when the digest has no matching row
/// or has accumulated no timer wait yet, letting the caller fall back.
async fn classify_from_digest_metrics(ctx: &WorkflowContext, digest_sql: &str) -> Option<Bound> {
    let sql = format!(
        "SELECT SUM_TIMER_WAIT, SUM_LOCK_TIME, SUM_ROWS_EXAMINED, SUM_ROWS_SENT, SUM_NO_INDEX_USED \
         FROM performance_schema.events_statements_summary_by_digest \
         WHERE DIGEST_TEXT = '{}' ORDER BY LAST_SEEN DESC LIMIT 1",
        digest_sql.replace('\'', "''")
    );
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": sql })).await.ok()?;
    let row = result["rows"].as_array()?.first()?.as_array()?;

    let timer_wait = row.first()?.as_f64().unwrap_or(0.0);
    if timer_wait <= 0.0 {
        return None;
    }
    let lock_time = row.get(1).and_then(Value::as_f64).unwrap_or(0.0);
    let rows_examined = row.get(2).and_then(Value::as_f64).unwrap_or(0.0);
    let rows_sent = row.get(3).and_then(Value::as_f64).unwrap_or(0.0);
    let no_index_used = row.get(4).and_then(Value::as_u64).unwrap_or(0);

    let lock_ratio = lock_time / timer_wait;
    let scan_ratio = if rows_sent > 0.0 { rows_examined / rows_sent } else { rows_examined };

    Some(if lock_ratio > 0.2 {
        Bound::Lock
    } else if no_index_used > 0 && scan_ratio > 10.0 {
        Bound::Io
    } else if scan_ratio <= 10.0 && lock_ratio < 0.05 {
        Bound::Cpu
    } else {
        Bound::Unknown
    })
}

fn heuristic_bound(plan_text: &str) -> Bound {
    let lower = plan_text.to_lowercase();
    if lower.contains("\"using_filesort\":true") || lower.contains("lock") {
        Bound::Lock
    } else if lower.contains("\"using_index\":false") && lower.contains("\"rows_examined_per_scan\"") {
        Bound::Io
    } else if lower.contains("\"possible_keys\":null") {
        Bound::Cpu
    } else {
        Bound::Unknown
    }
}

static LIKE_WILDCARD_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

/// Only suggests a fulltext rewrite when an applicable index genuinely
/// exists -- never a bare recommendation to add one.
async fn fulltext_suggestion(ctx: &WorkflowContext, sql: &str) -> Option<String> {
    let re = LIKE_WILDCARD_RE.get_or_init(|| Regex::new(r"(?i)(\w+)\s+LIKE\s+'%").unwrap());
    let column = re.captures(sql)?.get(1)?.as_str().to_string();

    let table_guess = sql.split_whitespace().skip_while(|w| !w.eq_ignore_ascii_case("from")).nth(1)?.trim_matches(|c| c == '`' || c == ';').to_string();

    let check_sql = format!(
        "SELECT INDEX_NAME FROM information_schema.STATISTICS \
         WHERE TABLE_NAME = '{}' AND COLUMN_NAME = '{}' AND INDEX_TYPE = 'FULLTEXT'",
        table_guess.replace('\'', ""),
        column.replace('\'', "")
    );
    let result = ctx.call_tool("run_readonly_query", json!({ "sql": check_sql })).await.ok()?;
    let has_fulltext = result["row_count"].as_u64().unwrap_or(0) > 0;
    if has_fulltext {
        Some(format!("A fulltext index exists on `{table_guess}.{column}`; rewrite the leading-wildcard LIKE as `MATCH ({column}) AGAINST (...)`."))
    } else {
        None
    }
}

fn render_markdown(using_table: bool, window_hours: u32, findings: &[Finding]) -> String {
    let source = if using_table { "the slow-query performance_schema digest table" } else { "a supplied slow-log file" };
    let mut md = format!("## Slow-query analysis\n\nSource: {source}. Window: {window_hours}h.\n\n");
    if findings.is_empty() {
        md.push_str("No slow-query patterns were found in the window.\n");
        return md;
    }
    for finding in findings {
        md.push_str(&format!("### `{}`\n\n", finding.title));
        for indicator in &finding.indicators {
            md.push_str(&format!("- {indicator}\n"));
        }
        for action in &finding.suggested_actions {
            md.push_str(&format!("- Recommendation: {action}\n"));
        }
        md.push('\n');
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slow_log_text_into_buckets() {
        let text = "# Query_time: 1.5  Lock_time: 0.0\nSELECT * FROM users WHERE id = 1;\n# Query_time: 2.5  Lock_time: 0.0\nSELECT * FROM users WHERE id = 2;\n";
        let patterns = parse_slow_log_text(text);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].count, 2);
        assert!((patterns[0].total_duration_secs - 4.0).abs() < 1e-9);
    }
}
