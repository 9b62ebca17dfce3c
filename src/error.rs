use thiserror::Error;

/// Failure to obtain a usable rule document. Fatal to the run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Error parsing JSON rule document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Error parsing YAML rule document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("No 'rules' key found in rule document")]
    MissingRules,
}

/// Why a relative date expression such as `"10 days"` could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("expected '<integer> <unit>', got '{0}'")]
    Malformed(String),
    #[error("unsupported time period '{0}' (use days or months)")]
    UnsupportedUnit(String),
    #[error("'{0}' is out of the representable date range")]
    OutOfRange(String),
}

/// Non-fatal problem found while compiling a rule. The offending condition
/// or action is dropped and its siblings carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationWarning {
    #[error("condition {index} is missing required key(s): {}", .keys.join(", "))]
    MissingKey {
        index: usize,
        keys: Vec<&'static str>,
    },
    #[error("condition {index} uses unknown field '{field}'")]
    UnknownField { index: usize, field: String },
    #[error("condition {index}: predicate '{predicate}' is not supported for field '{field}'")]
    UnsupportedPredicate {
        index: usize,
        field: String,
        predicate: String,
    },
    #[error("condition {index}: invalid relative date: {reason}")]
    InvalidDate {
        index: usize,
        reason: DateParseError,
    },
    #[error("unknown overall predicate '{0}', falling back to All")]
    UnknownOverallPredicate(String),
    #[error("no usable conditions; rule matches nothing")]
    NoConditions,
    #[error("action {index}: unknown action '{action}'")]
    UnknownAction { index: usize, action: String },
    #[error("action {index}: missing action type")]
    MissingActionType { index: usize },
    #[error("action {index}: move requires a folder")]
    MissingFolder { index: usize },
}

/// Unexpected failure while assembling a rule's predicate.
#[derive(Debug, Error)]
pub enum QueryBuildError {
    #[error("rule has {count} usable conditions, at most {limit} are supported")]
    TooManyConditions { count: usize, limit: usize },
}

/// Record retrieval failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Email {id} has an unreadable date_received '{value}'")]
    InvalidDate { id: String, value: String },
    #[error("Record store unavailable: {0}")]
    Unavailable(String),
}

/// Failure talking to the mail service. Always isolated to the call that
/// triggered it.
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Mail service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid mail service URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Invalid mail service endpoint: {0}")]
    Endpoint(String),
    #[error("No access token available: {0}")]
    Auth(String),
    #[error("{0}")]
    Other(String),
}

impl RemoteServiceError {
    /// Transient failures that are safe to retry for idempotent mutations.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteServiceError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            RemoteServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// A failure that ends processing of a single rule.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Error building query: {0}")]
    QueryBuild(#[from] QueryBuildError),
    #[error("Error querying emails: {0}")]
    Store(#[from] StoreError),
}
