// src/error.rs
use thiserror::Error;

/// Caller-visible errors for the discovery pipeline surface.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Weekly quota exhausted: {used} of {limit} jobs already used this week")]
    QuotaExhausted { used: i64, limit: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Classified upstream failures from the job-listing provider.
///
/// Only `Transient` is eligible for retry; everything else propagates
/// immediately with the upstream reason preserved verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    #[error("Provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("Provider access forbidden: {0}")]
    Forbidden(String),

    #[error("Provider resource not found: {0}")]
    NotFound(String),

    #[error("Transient provider failure: {0}")]
    Transient(String),
}

impl ProviderError {
    /// Classify an upstream HTTP status into an error kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        let reason = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.trim())
        };

        match status {
            401 => ProviderError::Auth(reason),
            403 => ProviderError::Forbidden(reason),
            404 => ProviderError::NotFound(reason),
            429 => ProviderError::RateLimited(reason),
            _ => ProviderError::Transient(reason),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Why the primary analysis path was abandoned for a posting.
///
/// Never fatal: every variant routes the posting to the fallback analyzer.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analysis request failed: {0}")]
    Request(String),

    #[error("Analysis response was not parseable JSON: {0}")]
    MalformedResponse(String),

    #[error("Analysis response missing too many required fields: {missing} of {required}")]
    Incomplete { missing: usize, required: usize },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
