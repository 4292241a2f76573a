//! Pooled, read-only MariaDB/MySQL access with query-shape
//! validation, row/byte caps, and a round-robin replica probe.

mod gateway;
mod snapshot;
mod types;

pub use gateway::{validate_query_shape, DbGateway, DEFAULT_PROBE_COUNT, MAX_PROBE_COUNT};
pub use snapshot::{build_health_snapshot, HealthSnapshot, ResourcePressure, GOLDEN_GLOBAL_VARIABLES, GOLDEN_STATUS_VARIABLES};
pub use types::{
    Cell, ConnectionDescriptor, QueryRequest, QueryResult, ReplicaStatusRow, RoleHint,
    ServerCapabilities, TlsMode, DEFAULT_QUERY_TIMEOUT, DEFAULT_ROW_CAP, MAX_QUERY_TIMEOUT,
    MAX_ROW_CAP, RESULT_BYTE_BUDGET,
};
