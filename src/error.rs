use thiserror::Error;

/// Crate-wide error type covering configuration, network, provider, and
/// persistence failures.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network transport errors (transient - should retry)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Non-2xx responses, carried with the body snippet for diagnostics
    #[error("HTTP status {code}: {message}")]
    Status { code: u16, message: String },

    // Raised by the retry engine when all attempts are exhausted or the
    // consecutive-429 ceiling is hit
    #[error("{operation} failed after {attempts} attempts (last status: {last_status:?})")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_status: Option<u16>,
        message: String,
    },

    #[error("Operation timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: f64 },

    // Input that cannot be interpreted (malformed IDs, bad thresholds)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // Provider payloads that fail to parse
    #[error("Parse error in {context}: {message}")]
    Parse { context: String, message: String },

    // Persistence layer
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Error categorization for retry strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Rate limited - retry with backoff and 429 accounting
    RateLimited,
}

impl Error {
    /// HTTP status code associated with this error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { code, .. } => Some(*code),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            Error::RetryExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }

    /// Categorize error for retry logic.
    ///
    /// Status-code classification is refined further by
    /// [`crate::resilience::ApiRetryPolicy`]; this is the coarse split used
    /// when no policy is in play.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::InvalidConfig { .. }
            | Error::InvalidInput { .. }
            | Error::Parse { .. }
            | Error::Serde(_)
            | Error::Database(_)
            | Error::RetryExhausted { .. } => ErrorCategory::Permanent,

            Error::Status { code, .. } => match *code {
                429 => ErrorCategory::RateLimited,
                500..=599 => ErrorCategory::Transient,
                _ => ErrorCategory::Permanent,
            },

            // Transport-level reqwest failures (timeouts, refused
            // connections, DNS) are transient; embedded status codes are
            // classified like `Status`.
            Error::Http(e) => match e.status() {
                Some(s) if s.as_u16() == 429 => ErrorCategory::RateLimited,
                Some(s) if s.is_server_error() => ErrorCategory::Transient,
                Some(_) => ErrorCategory::Permanent,
                None => ErrorCategory::Transient,
            },

            Error::Timeout { .. } => ErrorCategory::Transient,
        }
    }

    /// Whether a transport-level (non-status) network failure occurred.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Error::Http(e) => e.status().is_none(),
            Error::Timeout { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
