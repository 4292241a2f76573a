//! Normalizes raw log lines into a bounded, ranked
//! set of severity-classified patterns.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const DEFAULT_MAX_PATTERNS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    // ordered so that `Unknown < Info < Warning < Error`; the extractor
    // sorts by `Reverse(severity)` to put Error first.
    Unknown,
    Info,
    Warning,
    Error,
}

/// error pattern (normalized).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPattern {
    pub fingerprint: String,
    pub severity: Severity,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub count: u64,
    pub sample: String,
}

static CONTAINER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\S+\s+\d{4}-\d{2}-\d{2}T[\d:.\-+Z]+\s+(stdout|stderr)\s+\S?\s*").unwrap()
});
static ISO_TS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?").unwrap());
static SLASH_TS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6}\s+\d{1,2}:\d{2}:\d{2}").unwrap());
static PID_TS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(pid|tid)[=: ]+\d+").unwrap());
static PAREN_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)\)").unwrap());
static LONG_NUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4,}").unwrap());
static DOTTED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\b").unwrap());
static VERSION_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Left-hand side tokens treated as "known schema-ish" /// step 6 — conservative, avoids mangling `mysqld.1` or `5.7` style tokens.
fn looks_schema_ish(token: &str) -> bool {
    !token.is_empty() && !VERSION_LIKE.is_match(token) && token.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
}

/// Applies the normalization pipeline to one line.
pub fn normalize_line(line: &str) -> String {
    let mut s = CONTAINER_PREFIX.replace(line, "").to_string();
    s = ISO_TS.replace_all(&s, "<TS>").to_string();
    s = SLASH_TS.replace_all(&s, "<TS>").to_string();
    s = PID_TS.replace_all(&s, "<PID>").to_string();
    s = PAREN_ID.replace_all(&s, "(<ID>)").to_string();
    s = LONG_NUM.replace_all(&s, "<NUM>").to_string();
    s = DOTTED_NAME
        .replace_all(&s, |caps: &regex::Captures| {
            if looks_schema_ish(&caps[1]) { "<DB>.<TBL>".to_string() } else { caps[0].to_string() }
        })
        .to_string();
    s = WHITESPACE.replace_all(s.trim(), " ").to_string();
    s
}

/// Case-insensitive, first-match-wins classification.
pub fn classify_severity(line: &str) -> Severity {
    let upper = line.to_uppercase();
    if upper.contains("[ERROR]") || upper.contains(" ERROR ") {
        Severity::Error
    } else if upper.contains("[WARNING]") || upper.contains("WARN") {
        Severity::Warning
    } else if upper.contains("[NOTE]") || upper.contains("[INFO]") {
        Severity::Info
    } else {
        Severity::Unknown
    }
}

fn parse_timestamp(line: &str) -> Option<DateTime<Utc>> {
    if let Some(m) = ISO_TS.find(line) {
        let text = m.as_str().replace(' ', "T");
        if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    if let Some(m) = SLASH_TS.find(line) {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(m.as_str(), "%y%m%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

struct Accumulator {
    severity: Severity,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    count: u64,
    sample: String,
}

/// `extract(text, max_patterns)`: normalizes every line,
/// groups by fingerprint, and returns the top `max_patterns` by (severity
/// desc, count desc, recency desc). Intermediate memory is bounded only by
/// log size — the cap applies to the returned slice, not the working set.
pub fn extract(text: &str, max_patterns: usize) -> Vec<ErrorPattern> {
    let mut groups: std::collections::HashMap<String, Accumulator> = std::collections::HashMap::new();
    let mut carry_forward_ts: Option<DateTime<Utc>> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fingerprint = normalize_line(line);
        let severity = classify_severity(line);
        let parsed_ts = parse_timestamp(line);
        if parsed_ts.is_some() {
            carry_forward_ts = parsed_ts;
        }
        let last_seen = parsed_ts.or(carry_forward_ts);

        groups
            .entry(fingerprint.clone())
            .and_modify(|acc| {
                acc.count += 1;
                if let Some(ts) = last_seen {
                    acc.last_seen = Some(ts);
                }
            })
            .or_insert_with(|| Accumulator {
                severity,
                first_seen: parsed_ts,
                last_seen,
                count: 1,
                sample: line.to_string(),
            });
    }

    let mut patterns: Vec<ErrorPattern> = groups
        .into_iter()
        .map(|(fingerprint, acc)| ErrorPattern {
            fingerprint,
            severity: acc.severity,
            first_seen: acc.first_seen,
            last_seen: acc.last_seen,
            count: acc.count,
            sample: acc.sample,
        })
        .collect();

    patterns.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| b.last_seen.cmp(&a.last_seen))
    });
    patterns.truncate(max_patterns);
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_timestamps_and_ids() {
        let line = "2024-01-02T03:04:05.123456Z [ERROR] Connection (12345) to app.users failed, pid=9911";
        let normalized = normalize_line(line);
        assert!(normalized.contains("<TS>"));
        assert!(normalized.contains("(<ID>)"));
        assert!(normalized.contains("<DB>.<TBL>"));
        assert!(normalized.contains("<PID>"));
    }

    #[test]
    fn classifies_severity_first_match_wins() {
        assert_eq!(classify_severity("2024 [ERROR] boom"), Severity::Error);
        assert_eq!(classify_severity("a WARN message"), Severity::Warning);
        assert_eq!(classify_severity("[NOTE] starting up"), Severity::Info);
        assert_eq!(classify_severity("plain line"), Severity::Unknown);
    }

    #[test]
    fn groups_identical_fingerprints_and_orders_by_severity_then_count() {
        let text = "\
[INFO] server starting
[ERROR] disk full on /data
[ERROR] disk full on /data
[WARNING] slow query detected";
        let patterns = extract(text, 10);
        assert_eq!(patterns[0].severity, Severity::Error);
        assert_eq!(patterns[0].count, 2);
        assert!(patterns.iter().all(|p| p.first_seen.is_none() || p.first_seen <= p.last_seen));
    }

    #[test]
    fn caps_to_max_patterns() {
        let text = (0..50).map(|i| format!("[ERROR] distinct failure number {i}")).collect::<Vec<_>>().join("\n");
        let patterns = extract(&text, 5);
        assert_eq!(patterns.len(), 5);
    }

    #[test]
    fn is_idempotent_on_repeated_extraction() {
        let text = "[ERROR] disk full on /data\n[WARNING] slow query";
        let a = extract(text, 20);
        let b = extract(text, 20);
        let fingerprints_a: Vec<_> = a.iter().map(|p| (&p.fingerprint, p.count)).collect();
        let fingerprints_b: Vec<_> = b.iter().map(|p| (&p.fingerprint, p.count)).collect();
        assert_eq!(fingerprints_a, fingerprints_b);
    }
}
