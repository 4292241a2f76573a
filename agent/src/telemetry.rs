//! An append-only, thread-safe sequence of
//! per-invocation telemetry, aggregated across a call tree.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

const PERSIST_PATH: &str = "./.observability_log.json";

/// A telemetry record: one per LLM round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub root_invocation_id: Uuid,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub round_trips: u64,
    /// `self` or a sub-agent/workflow name.
    pub attribution: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TelemetryTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub round_trips: u64,
    pub by_attribution: HashMap<String, TelemetryTotals>,
}

// recursive field needs boxing at the type level via HashMap<String, Self> -
// serde handles this fine since HashMap<String, T> is not infinitely sized
// (it's heap allocated); no special annotation required.

/// A tool invocation record, finalized by the registry on exit and appended
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub id: Uuid,
    pub parent: Option<Uuid>,
    pub tool_name: String,
    pub normalized_arguments: serde_json::Value,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub outcome: InvocationOutcome,
    pub result_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationOutcome {
    Ok,
    FailedWithKind,
    GuardrailRejected,
    Timeout,
    Cancelled,
}

/// A plain `Mutex<Vec<_>>` is enough given the low write rate; no need for
/// `dashmap`-style sharded locking here.
#[derive(Clone, Default)]
pub struct TelemetrySink {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
    invocations: Arc<Mutex<Vec<ToolInvocationRecord>>>,
}

impl TelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, record: TelemetryRecord) {
        self.persist_best_effort(&record).await;
        self.records.lock().await.push(record);
    }

    /// Aggregates totals across every record attributed to `root_invocation_id`.
    pub async fn aggregate(&self, root_invocation_id: Uuid) -> TelemetryTotals {
        let records = self.records.lock().await;
        let mut totals = TelemetryTotals::default();

        for record in records.iter().filter(|r| r.root_invocation_id == root_invocation_id) {
            totals.input_tokens += record.input_tokens;
            totals.output_tokens += record.output_tokens;
            totals.total_tokens += record.total_tokens;
            totals.round_trips += record.round_trips;

            let bucket = totals.by_attribution.entry(record.attribution.clone()).or_default();
            bucket.input_tokens += record.input_tokens;
            bucket.output_tokens += record.output_tokens;
            bucket.total_tokens += record.total_tokens;
            bucket.round_trips += record.round_trips;
        }

        totals
    }

    pub async fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.records.lock().await.clone()
    }

    pub async fn append_invocation(&self, record: ToolInvocationRecord) {
        self.invocations.lock().await.push(record);
    }

    pub async fn invocation_snapshot(&self) -> Vec<ToolInvocationRecord> {
        self.invocations.lock().await.clone()
    }

    /// Best-effort append to `./.observability_log.json`. Failure never
    /// propagates to the caller — a write error is logged
    /// and swallowed.
    async fn persist_best_effort(&self, record: &TelemetryRecord) {
        let record = record.clone();
        let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new().create(true).append(true).open(PERSIST_PATH)?;
            let line = serde_json::to_string(&record).unwrap_or_default();
            writeln!(file, "{line}")
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to persist telemetry record"),
            Err(e) => tracing::warn!(error = %e, "telemetry persistence task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aggregates_by_root_and_attribution() {
        let sink = TelemetrySink::new();
        let root = Uuid::new_v4();
        let other_root = Uuid::new_v4();

        sink.append(TelemetryRecord {
            root_invocation_id: root,
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
            round_trips: 1,
            attribution: "self".to_string(),
        })
        .await;
        sink.append(TelemetryRecord {
            root_invocation_id: root,
            input_tokens: 20,
            output_tokens: 8,
            total_tokens: 28,
            round_trips: 2,
            attribution: "slow-query".to_string(),
        })
        .await;
        sink.append(TelemetryRecord {
            root_invocation_id: other_root,
            input_tokens: 999,
            output_tokens: 999,
            total_tokens: 1998,
            round_trips: 9,
            attribution: "self".to_string(),
        })
        .await;

        let totals = sink.aggregate(root).await;
        assert_eq!(totals.total_tokens, 43);
        assert_eq!(totals.round_trips, 3);
        assert_eq!(totals.by_attribution.get("self").unwrap().total_tokens, 15);
        assert_eq!(totals.by_attribution.get("slow-query").unwrap().total_tokens, 28);
    }
}
