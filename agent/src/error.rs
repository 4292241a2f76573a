use thiserror::Error;

/// The error taxonomy shared by every component.
///
/// Each variant carries enough context for a workflow to decide whether to
/// treat the failure as evidence (and degrade) or as terminal.
#[derive(Error, Debug)]
pub enum AgentError {
    // --- DB gateway ---
    #[error("query shape not allowed: {0}")]
    UnsafeQuery(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("authentication failed against the database")]
    AuthFailed,

    #[error("schema missing: {0}")]
    SchemaMissing(String),

    #[error("database backend error (code {code}): {message}")]
    BackendError { code: i32, message: String },

    #[error("performance instrumentation is not enabled on this server")]
    InstrumentationDisabled,

    // --- log ingestor ---
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("permission denied reading {0}")]
    PermissionDenied(String),

    #[error("observability credentials not configured")]
    NotConfigured,

    #[error("unauthorized (401) against the observability endpoint")]
    Unauthorized,

    #[error("forbidden (403) against the observability endpoint")]
    Forbidden,

    #[error("log payload exceeds the size cap: {0} bytes")]
    TooLarge(u64),

    // --- guardrails ---
    #[error("input blocked by guardrail: {0}")]
    InputBlocked(String),

    // --- tool runtime ---
    #[error("tool arguments failed validation: {0}")]
    BadArgs(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    // --- orchestrator ---
    #[error("operation cancelled")]
    Cancelled,

    #[error("turn/time/token budget exceeded")]
    BudgetExceeded,

    #[error("configuration error: {0}")]
    Configuration(String),

    // --- transparent conversions ---
    #[error("database error: {0}")]
    Database(#[from] mysql_async::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The error *kind*, independent of the context carried by the variant, so
/// callers can match on kind without destructuring the variant's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsafeQuery,
    Timeout,
    ConnectionLost,
    AuthFailed,
    SchemaMissing,
    BackendError,
    InstrumentationDisabled,
    FileNotFound,
    PermissionDenied,
    NotConfigured,
    Unauthorized,
    Forbidden,
    TooLarge,
    InputBlocked,
    BadArgs,
    UnknownTool,
    Cancelled,
    BudgetExceeded,
    Configuration,
    Other,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsafeQuery(_) => ErrorKind::UnsafeQuery,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::AuthFailed => ErrorKind::AuthFailed,
            Self::SchemaMissing(_) => ErrorKind::SchemaMissing,
            Self::BackendError { .. } => ErrorKind::BackendError,
            Self::InstrumentationDisabled => ErrorKind::InstrumentationDisabled,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::NotConfigured => ErrorKind::NotConfigured,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::TooLarge(_) => ErrorKind::TooLarge,
            Self::InputBlocked(_) => ErrorKind::InputBlocked,
            Self::BadArgs(_) => ErrorKind::BadArgs,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::BudgetExceeded => ErrorKind::BudgetExceeded,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Database(_) | Self::Http(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Other,
        }
    }

    /// Whether a workflow should treat this as "degrade and continue"
    /// evidence rather than a terminal failure.
    pub fn is_degradable(&self) -> bool {
        matches!(self.kind(), ErrorKind::InstrumentationDisabled | ErrorKind::SchemaMissing)
    }

    /// CLI exit code: 0 success, 2 configuration error,
    /// 3 unrecoverable backend error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Configuration | ErrorKind::NotConfigured => 2,
            _ => 3,
        }
    }

    pub fn unsafe_query(message: impl Into<String>) -> Self {
        Self::UnsafeQuery(message.into())
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost(message.into())
    }

    pub fn schema_missing(message: impl Into<String>) -> Self {
        Self::SchemaMissing(message.into())
    }

    pub fn backend_error(code: i32, message: impl Into<String>) -> Self {
        Self::BackendError { code, message: message.into() }
    }

    pub fn input_blocked(reason: impl Into<String>) -> Self {
        Self::InputBlocked(reason.into())
    }

    pub fn bad_args(message: impl Into<String>) -> Self {
        Self::BadArgs(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
