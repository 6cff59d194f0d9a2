//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Routing decisions made by the request queue and the model fallback
//! cascade are answered here so both layers agree on what is transient.
//!
//! ## Routing Classes
//!
//! - **Retryable**: rate limits, timeouts, network failures, 5xx (queue retries)
//! - **Request invalid**: 400/401/403, bad keys (abort the cascade)
//! - **Truncation**: incomplete JSON payload (split the batch)
//! - **Capacity**: queue full (reject immediately)

use std::time::Duration;
use thiserror::Error;

use super::provider::Provider;

/// Message fragments that mark a failure as transient.
const RETRYABLE_PATTERNS: &[&str] = &[
    "429",
    "rate limit",
    "too many requests",
    "timeout",
    "timed out",
    "network",
    "connection",
    "econnreset",
    "etimedout",
    "econnrefused",
    "socket hang up",
    "500",
    "502",
    "503",
    "504",
    "service unavailable",
    "bad gateway",
    "internal server error",
    "overloaded",
];

/// Message fragments that mark a request as invalid regardless of provider health.
const REQUEST_INVALID_PATTERNS: &[&str] = &[
    "401",
    "403",
    "400",
    "invalid api key",
    "api key not valid",
    "invalid x-api-key",
    "incorrect api key",
    "access denied",
    "permission denied",
    "unauthorized",
    "malformed",
];

/// Check whether an error message describes a transient condition
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

fn is_request_invalid_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    REQUEST_INVALID_PATTERNS.iter().any(|p| lower.contains(p))
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum MarksortError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Provider Errors
    // -------------------------------------------------------------------------
    /// Non-2xx response from a provider endpoint
    #[error("{provider} API error ({status}): {message}")]
    Provider {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// Transport failure before a response was received
    #[error("{provider} network error: {message}")]
    Network { provider: Provider, message: String },

    /// Free-form LLM failure, routed by message content
    #[error("LLM API error: {0}")]
    LlmApi(String),

    // -------------------------------------------------------------------------
    // Queue Errors
    // -------------------------------------------------------------------------
    #[error("Request queue full for {provider}: {depth} waiting (max {max})")]
    QueueFull {
        provider: Provider,
        depth: usize,
        max: usize,
    },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<MarksortError>,
    },

    #[error("Request abandoned: {0}")]
    Cancelled(String),

    // -------------------------------------------------------------------------
    // Response Errors
    // -------------------------------------------------------------------------
    #[error("Truncated response: {0}")]
    Truncated(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // Orchestration Errors
    // -------------------------------------------------------------------------
    #[error("All {attempted} model candidates failed; last tried {last_candidate}: {source}")]
    AllCandidatesFailed {
        attempted: usize,
        last_candidate: String,
        #[source]
        source: Box<MarksortError>,
    },

    #[error("No model candidates available: configure at least one provider API key")]
    NoCandidates,

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Bookmark store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, MarksortError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl MarksortError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a free-form LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::LlmApi(message.into())
    }

    /// Whether the request queue may retry this failure on the same provider
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { status, .. } => !matches!(status, 400 | 401 | 403),
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::QueueFull { .. }
            | Self::UnknownProvider(_)
            | Self::RetriesExhausted { .. }
            | Self::Cancelled(_)
            | Self::Truncated(_)
            | Self::Parse(_)
            | Self::Validation(_)
            | Self::AllCandidatesFailed { .. }
            | Self::NoCandidates
            | Self::Config(_) => false,
            Self::LlmApi(msg) => is_retryable_message(msg),
            Self::Io(_) | Self::Json(_) | Self::Store(_) => is_retryable_message(&self.to_string()),
        }
    }

    /// Whether the failure concerns credentials or request shape rather than
    /// provider availability. Such errors stop the whole fallback cascade.
    pub fn is_request_invalid(&self) -> bool {
        match self {
            Self::Provider { status, .. } => matches!(status, 400 | 401 | 403),
            Self::LlmApi(msg) => is_request_invalid_message(msg),
            Self::RetriesExhausted { source, .. } => source.is_request_invalid(),
            _ => false,
        }
    }

    /// Whether the failure is a structurally incomplete model response
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::Truncated(_))
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Provider { status, .. } => Some(*status),
            Self::RetriesExhausted { source, .. } | Self::AllCandidatesFailed { source, .. } => {
                source.status()
            }
            _ => None,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| MarksortError::Store(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| MarksortError::Store(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
