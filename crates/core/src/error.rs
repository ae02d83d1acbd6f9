//! Error types for the banter domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is the
//! caller-facing taxonomy every generation request resolves to.

use serde::Serialize;
use thiserror::Error;

/// The top-level error type returned by the response pipeline.
#[derive(Debug, Error)]
pub enum Error {
    // --- Validation ---
    #[error("Invalid input: {0}")]
    InvalidInput(ValidationError),

    #[error("Invalid model output: {0}")]
    InvalidOutput(ValidationError),

    // --- Completion backend ---
    #[error("Backend rejected the request: {0}")]
    PermanentBackend(ProviderError),

    #[error("Backend still failing after {attempts} attempts: {last}")]
    TransientBackend { attempts: u32, last: ProviderError },

    #[error("Circuit open for '{endpoint}', backend not called")]
    CircuitOpen { endpoint: String },

    // --- Caller ---
    #[error("Generation cancelled")]
    Cancelled,

    // --- History store ---
    #[error("History store error: {0}")]
    Dependency(#[from] HistoryError),

    // --- Configuration ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used for logging and metrics tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    PermanentBackend,
    TransientBackend,
    CircuitOpen,
    Cancelled,
    Dependency,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::PermanentBackend => "permanent_backend",
            Self::TransientBackend => "transient_backend",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Dependency => "dependency",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// The taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::InvalidOutput(_) => ErrorKind::Validation,
            Self::PermanentBackend(_) => ErrorKind::PermanentBackend,
            Self::TransientBackend { .. } => ErrorKind::TransientBackend,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Dependency(_) => ErrorKind::Dependency,
            Self::Config { .. } => ErrorKind::Config,
        }
    }
}

impl From<InvokeError> for Error {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Permanent(e) => Self::PermanentBackend(e),
            InvokeError::Exhausted { attempts, last } => Self::TransientBackend { attempts, last },
            InvokeError::CircuitOpen { endpoint } => Self::CircuitOpen { endpoint },
            InvokeError::Cancelled => Self::Cancelled,
        }
    }
}

// --- Bounded context errors ---

/// Text normalization failures. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("input is empty")]
    EmptyInput,

    #[error("text is empty after normalization")]
    EmptyResult,
}

/// Whether a backend failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Permanent,
    Transient,
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Content rejected by provider policy: {0}")]
    ContentRejected(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Substrings in an error body that mark a request as unfixable by retrying.
const PERMANENT_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "request too large",
    "payload too large",
    "content_policy",
    "content_filter",
    "invalid_api_key",
    "insufficient_quota",
    "invalid_request_error",
];

impl ProviderError {
    /// Classify this failure for the retry loop.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::MalformedResponse(_) => FailureClass::Transient,
            Self::AuthenticationFailed(_)
            | Self::ModelNotFound(_)
            | Self::InvalidRequest(_)
            | Self::ContentRejected(_)
            | Self::NotConfigured(_) => FailureClass::Permanent,
            Self::ApiError {
                status_code,
                message,
            } => classify_api_error(*status_code, message),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.classify() == FailureClass::Permanent
    }
}

fn classify_api_error(status_code: u16, message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Permanent;
    }
    match status_code {
        408 | 425 | 429 => FailureClass::Transient,
        400..=499 => FailureClass::Permanent,
        _ => FailureClass::Transient,
    }
}

/// History store failures. Surfaced to the caller as [`Error::Dependency`].
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Outcome of a failed resilient invocation.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("permanent backend error: {0}")]
    Permanent(ProviderError),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ProviderError },

    #[error("circuit open for '{endpoint}'")]
    CircuitOpen { endpoint: String },

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::PermanentBackend(ProviderError::ApiError {
            status_code: 413,
            message: "Request too large".into(),
        });
        assert!(err.to_string().contains("413"));
        assert!(err.to_string().contains("Request too large"));
    }

    #[test]
    fn auth_and_shape_errors_are_permanent() {
        assert!(ProviderError::AuthenticationFailed("bad key".into()).is_permanent());
        assert!(ProviderError::InvalidRequest("missing messages".into()).is_permanent());
        assert!(
            ProviderError::ApiError {
                status_code: 400,
                message: "bad".into()
            }
            .is_permanent()
        );
    }

    #[test]
    fn network_and_server_errors_are_transient() {
        assert!(!ProviderError::Network("conn reset".into()).is_permanent());
        assert!(!ProviderError::Timeout("60s".into()).is_permanent());
        assert!(!ProviderError::RateLimited { retry_after_secs: 5 }.is_permanent());
        for status in [408, 429, 500, 502, 503] {
            let err = ProviderError::ApiError {
                status_code: status,
                message: "try later".into(),
            };
            assert_eq!(err.classify(), FailureClass::Transient, "status {status}");
        }
    }

    #[test]
    fn error_body_markers_override_status() {
        let err = ProviderError::ApiError {
            status_code: 500,
            message: r#"{"error":{"code":"context_length_exceeded"}}"#.into(),
        };
        assert_eq!(err.classify(), FailureClass::Permanent);
    }

    #[test]
    fn invoke_errors_map_to_kinds() {
        let exhausted: Error = InvokeError::Exhausted {
            attempts: 3,
            last: ProviderError::Network("down".into()),
        }
        .into();
        assert_eq!(exhausted.kind(), ErrorKind::TransientBackend);
        assert!(exhausted.to_string().contains("3 attempts"));

        let open: Error = InvokeError::CircuitOpen {
            endpoint: "openrouter".into(),
        }
        .into();
        assert_eq!(open.kind(), ErrorKind::CircuitOpen);

        let cancelled: Error = InvokeError::Cancelled.into();
        assert_eq!(cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn validation_errors_share_a_kind() {
        assert_eq!(
            Error::InvalidInput(ValidationError::EmptyInput).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::InvalidOutput(ValidationError::EmptyResult).kind(),
            ErrorKind::Validation
        );
    }
}
