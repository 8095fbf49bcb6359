//! Error types for Costline
//!
//! Provides a unified error type and domain-specific error variants

use thiserror::Error;

/// Result type alias using CostlineError
pub type Result<T> = std::result::Result<T, CostlineError>;

/// Unified error type for Costline operations
#[derive(Debug, Error)]
pub enum CostlineError {
    // Provider API errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // Price catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // Window errors
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors returned by a provider API call
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited by provider (HTTP 429): {0}")]
    Throttled(String),

    #[error("provider server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed provider payload: {0}")]
    Malformed(String),

    #[error("rate limiter wait aborted: {0}")]
    RateLimiterAborted(String),
}

impl ProviderError {
    /// Whether another attempt at the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_) | ProviderError::Server { .. } | ProviderError::Transport(_)
        )
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => ProviderError::Throttled(body),
            500..=599 => ProviderError::Server { status, body },
            _ => ProviderError::Status { status, body },
        }
    }
}

/// Price catalog construction errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("expected exactly 1 product detail block in pricing page, found {found}")]
    ProductDataCount { found: usize },

    #[error("pricing page JSON is invalid: {0}")]
    InvalidJson(String),

    #[error("invalid rate {rate:?} for pricing key {key}")]
    InvalidRate { key: String, rate: String },

    #[error("estimated cost report is empty")]
    EmptyCostReport,

    #[error("catalog source unavailable: {0}")]
    SourceUnavailable(String),
}

/// Window splitting and validation errors
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("window start {start} is not before end {end}")]
    EmptyRange { start: String, end: String },

    #[error("{at} is not aligned to {resolution} resolution")]
    Misaligned { at: String, resolution: String },
}

// Implement From for common external error types
impl From<serde_json::Error> for CostlineError {
    fn from(err: serde_json::Error) -> Self {
        CostlineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for CostlineError {
    fn from(err: config::ConfigError) -> Self {
        CostlineError::Config(err.to_string())
    }
}
