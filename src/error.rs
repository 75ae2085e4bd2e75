use std::fmt;

/// Errors from the BigQuery client.
///
/// The variant determines retry behavior:
/// - `Transport` → retryable (connection reset, token refresh hiccup)
/// - `Api` → retryable only for rate limits and backend errors
/// - `Execution` / `Configuration` / `LocationMismatch` → non-retryable
#[derive(Debug)]
pub enum BigQueryError {
    /// The REST API answered with a non-success status.
    Api {
        status: u16,
        reason: String,
        message: String,
    },
    /// A job finished with an `errorResult`.
    Execution {
        job_id: String,
        reason: String,
        message: String,
    },
    /// Bad task or client configuration (empty query, non-gs:// source URI).
    Configuration(String),
    /// The dataset exists, but not in the expected location.
    LocationMismatch {
        dataset: String,
        expected: String,
        actual: String,
    },
    /// Network, auth, or response decoding failure.
    Transport(anyhow::Error),
}

impl BigQueryError {
    /// Whether the operation may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, reason, .. } => {
                matches!(status, 429 | 500 | 502 | 503)
                    || reason == "rateLimitExceeded"
                    || reason == "backendError"
            }
            Self::Execution { .. } | Self::Configuration(_) | Self::LocationMismatch { .. } => {
                false
            }
        }
    }

    /// HTTP 404 from the API.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// HTTP 409 from the API.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::Api {
            status: 404,
            reason: "notFound".to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn conflict(message: impl Into<String>) -> Self {
        Self::Api {
            status: 409,
            reason: "duplicate".to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for BigQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api {
                status,
                reason,
                message,
            } => write!(f, "BigQuery API error {status} ({reason}): {message}"),
            Self::Execution {
                job_id,
                reason,
                message,
            } => write!(f, "BigQuery job {job_id} failed ({reason}): {message}"),
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::LocationMismatch {
                dataset,
                expected,
                actual,
            } => write!(
                f,
                "dataset {dataset} is in location {actual}, expected {expected}"
            ),
            Self::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl std::error::Error for BigQueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(err) => Some(err.as_ref()),
            Self::Api { .. }
            | Self::Execution { .. }
            | Self::Configuration(_)
            | Self::LocationMismatch { .. } => None,
        }
    }
}

impl From<anyhow::Error> for BigQueryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transport(err)
    }
}

impl From<reqwest::Error> for BigQueryError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.into())
    }
}
