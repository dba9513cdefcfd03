use thiserror::Error;
use uuid::Uuid;

/// Message shown to users for any failure that is not a quota rejection.
pub const GENERIC_FAILURE_MESSAGE: &str = "search failed";

/// Application-wide error types for Scout.
#[derive(Error, Debug)]
pub enum AppError {
    /// Content provider rejected or failed a request.
    ///
    /// `retryable` separates transient failures (retried on a later
    /// continuation) from permanent ones (the term is given up for now).
    #[error("Provider error (HTTP {status_code:?}): {message}")]
    ProviderError {
        message: String,
        status_code: Option<u16>,
        retryable: bool,
    },

    /// HTTP request failed before a provider response was available.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Provider rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Stored continuation token could not be understood by the provider adapter.
    #[error("Malformed cursor: {0}")]
    MalformedCursor(String),

    /// Owner has used up their enrichment quota for the current period.
    #[error("Enrichment limit reached ({used}/{limit})")]
    QuotaExceeded { used: i64, limit: i64 },

    /// Job passed its deadline before finishing.
    #[error("Job exceeded its time limit")]
    TimeoutExceeded,

    /// Another delivery already advanced the job cursor.
    #[error("Concurrent update detected for job {job_id}")]
    ConcurrencyConflict { job_id: Uuid },

    /// Caller supplied invalid input.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    pub fn transient(message: impl Into<String>) -> Self {
        AppError::ProviderError {
            message: message.into(),
            status_code: None,
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        AppError::ProviderError {
            message: message.into(),
            status_code: None,
            retryable: false,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::ProviderError { retryable, .. } => *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if the provider told us the term itself is unusable.
    pub fn is_permanent_provider_error(&self) -> bool {
        match self {
            AppError::ProviderError { retryable, .. } => !retryable,
            AppError::HttpError(_) => !self.is_retryable(),
            _ => false,
        }
    }

    /// Returns true if this error should trip the circuit breaker.
    pub fn should_trip_circuit(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::ProviderError {
                status_code,
                retryable,
                ..
            } => matches!(status_code, Some(429) | Some(500..)) || *retryable,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("connection")
            }
            _ => false,
        }
    }

    /// Text safe to show to end users.
    ///
    /// Only quota rejections carry detail; everything else collapses to a
    /// generic failure so retry and conflict internals never leak.
    pub fn public_message(&self) -> String {
        match self {
            AppError::QuotaExceeded { .. } => self.to_string(),
            AppError::InvalidRequest(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}
