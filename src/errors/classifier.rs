//! Error Classification
//!
//! Maps raw failures onto a small taxonomy and turns them into user-facing
//! text with ordered recovery steps.
//!
//! Classification is substring matching over the lowercased message of the
//! error and every error in its `source()` chain. Rules are checked in a fixed
//! order and the first match wins:
//!
//! ```text
//! network → auth → rate_limit → permission → not_found
//!         → invalid_data → timeout → server_error → unknown
//! ```

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Free-form key/value context attached to a classified error
pub type ErrorContext = BTreeMap<String, Value>;

/// Context key naming the operation that failed
pub const OPERATION_KEY: &str = "operation";

const DEFAULT_OPERATION: &str = "processing your request";

/// Error taxonomy used for user-facing reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Auth,
    RateLimit,
    Permission,
    NotFound,
    InvalidData,
    Timeout,
    ServerError,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "NETWORK"),
            Self::Auth => write!(f, "AUTH"),
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Permission => write!(f, "PERMISSION"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::InvalidData => write!(f, "INVALID_DATA"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Ordered classification rules. Earlier rules shadow later ones.
const RULES: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Network,
        &[
            "network",
            "fetch failed",
            "failed to fetch",
            "connection",
            "econnrefused",
            "econnreset",
            "enotfound",
            "dns",
            "offline",
            "socket hang up",
            "unreachable",
        ],
    ),
    (
        ErrorKind::Auth,
        &[
            "api key",
            "apikey",
            "x-api-key",
            "unauthorized",
            "401",
            "authentication",
            "invalid key",
            "credential",
        ],
    ),
    (
        ErrorKind::RateLimit,
        &[
            "rate limit",
            "429",
            "too many requests",
            "quota",
            "resource exhausted",
            "queue full",
        ],
    ),
    (
        ErrorKind::Permission,
        &[
            "permission",
            "forbidden",
            "403",
            "access denied",
            "not allowed",
        ],
    ),
    (
        ErrorKind::NotFound,
        &["not found", "404", "does not exist", "no such", "can't find"],
    ),
    (
        ErrorKind::InvalidData,
        &[
            "invalid",
            "parse",
            "json",
            "malformed",
            "unexpected token",
            "syntax",
            "truncated",
            "validation",
            "400",
            "bad request",
        ],
    ),
    (ErrorKind::Timeout, &["timeout", "timed out", "deadline"]),
    (
        ErrorKind::ServerError,
        &[
            "500",
            "502",
            "503",
            "504",
            "server error",
            "internal error",
            "service unavailable",
            "bad gateway",
            "overloaded",
        ],
    ),
];

/// Stateless classifier over error messages
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a bare message
    pub fn classify_message(message: &str) -> ErrorKind {
        let lower = message.to_lowercase();
        RULES
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Classify an error together with its wrapped sources
    pub fn classify(err: &(dyn StdError + 'static)) -> ErrorKind {
        Self::classify_message(&error_chain(err).join(" "))
    }

    /// Short phrase and guidance sentence for a kind
    fn phrasing(kind: ErrorKind) -> (&'static str, &'static str) {
        match kind {
            ErrorKind::Network => (
                "Network connection failed",
                "Check your internet connection and try again",
            ),
            ErrorKind::Auth => (
                "Authentication failed",
                "Verify that your API key is correct and active",
            ),
            ErrorKind::RateLimit => (
                "Rate limit reached",
                "The provider is throttling requests, so wait before retrying",
            ),
            ErrorKind::Permission => (
                "Permission denied",
                "Your account is not allowed to perform this action",
            ),
            ErrorKind::NotFound => (
                "Resource not found",
                "The requested bookmark, folder, or model no longer exists",
            ),
            ErrorKind::InvalidData => (
                "Invalid data received",
                "The response could not be understood",
            ),
            ErrorKind::Timeout => (
                "Request timed out",
                "The provider took too long to respond",
            ),
            ErrorKind::ServerError => (
                "Provider service error",
                "The provider is having problems, so try again later",
            ),
            ErrorKind::Unknown => ("Unexpected error", "Please try again"),
        }
    }

    /// Build the templated user message
    pub fn user_message(kind: ErrorKind, context: &ErrorContext) -> String {
        let operation = context
            .get(OPERATION_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_OPERATION);
        let (phrase, guidance) = Self::phrasing(kind);
        format!("{} while {}. {}.", phrase, operation, guidance)
    }

    /// Ordered recovery actions for a kind
    pub fn recovery_steps(kind: ErrorKind) -> Vec<String> {
        let steps: &[&str] = match kind {
            ErrorKind::Network => &[
                "Check your internet connection",
                "Disable VPN or proxy settings that may block the provider",
                "Wait a moment and retry the operation",
            ],
            ErrorKind::Auth => &[
                "Open settings and re-enter your API key",
                "Confirm the key has not expired or been revoked",
                "Make sure the key belongs to the selected provider",
            ],
            ErrorKind::RateLimit => &[
                "Wait a minute before retrying",
                "Reduce the batch size in settings",
                "Add a key for another provider to spread the load",
                "Upgrade your provider plan for higher limits",
            ],
            ErrorKind::Permission => &[
                "Check that your API key has access to the selected model",
                "Review the provider account's permissions",
                "Try a different model",
            ],
            ErrorKind::NotFound => &[
                "Refresh the bookmark list",
                "Check that the target folder still exists",
                "Verify the configured model name",
            ],
            ErrorKind::InvalidData => &[
                "Retry the operation",
                "Reduce the batch size so responses stay shorter",
                "Try a different model",
            ],
            ErrorKind::Timeout => &[
                "Retry the operation",
                "Reduce the batch size",
                "Increase the request timeout in settings",
            ],
            ErrorKind::ServerError => &[
                "Wait a few minutes and retry",
                "Check the provider status page",
                "Configure another provider as a fallback",
            ],
            ErrorKind::Unknown => &[
                "Retry the operation",
                "Restart marksort",
                "Run with --verbose and report the logs if it persists",
            ],
        };
        steps.iter().map(|s| s.to_string()).collect()
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

// =============================================================================
// Context Error
// =============================================================================

/// Diagnostic summary of the wrapped error
#[derive(Debug, Clone, Serialize)]
pub struct OriginalError {
    pub message: String,
    pub chain: Vec<String>,
}

/// A classified failure ready for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextError {
    pub message: String,
    pub classification: ErrorKind,
    pub user_message: String,
    pub recovery_steps: Vec<String>,
    pub context: ErrorContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<OriginalError>,
    pub timestamp: DateTime<Utc>,
}

impl ContextError {
    /// Classify a bare message
    pub fn new(message: impl Into<String>, context: ErrorContext) -> Self {
        let message = message.into();
        let kind = ErrorClassifier::classify_message(&message);
        Self::build(message, kind, context, None)
    }

    /// Classify an error and keep a summary of it for diagnostics
    pub fn from_error(err: &(dyn StdError + 'static), context: ErrorContext) -> Self {
        let chain = error_chain(err);
        let kind = ErrorClassifier::classify_message(&chain.join(" "));
        let original = OriginalError {
            message: err.to_string(),
            chain: chain.into_iter().skip(1).collect(),
        };
        Self::build(err.to_string(), kind, context, Some(original))
    }

    fn build(
        message: String,
        kind: ErrorKind,
        context: ErrorContext,
        original_error: Option<OriginalError>,
    ) -> Self {
        Self {
            user_message: ErrorClassifier::user_message(kind, &context),
            recovery_steps: ErrorClassifier::recovery_steps(kind),
            message,
            classification: kind,
            context,
            original_error,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.classification
    }

    /// Plain JSON structure for logs and UI payloads
    pub fn to_record(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "message": self.message,
                "classification": self.classification.to_string(),
                "userMessage": self.user_message,
                "serializationError": e.to_string(),
            })
        })
    }
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)
    }
}

impl StdError for ContextError {}

/// Build an [`ErrorContext`] from key/value pairs
pub fn error_context<I, K, V>(pairs: I) -> ErrorContext
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarksortError, Provider};

    #[test]
    fn test_classify_priority_order() {
        assert_eq!(
            ErrorClassifier::classify_message("Connection timed out"),
            ErrorKind::Network
        );
        assert_eq!(
            ErrorClassifier::classify_message("Invalid API key provided"),
            ErrorKind::Auth
        );
        assert_eq!(
            ErrorClassifier::classify_message("HTTP 429 Too Many Requests"),
            ErrorKind::RateLimit
        );
        assert_eq!(
            ErrorClassifier::classify_message("403 Forbidden"),
            ErrorKind::Permission
        );
        assert_eq!(
            ErrorClassifier::classify_message("Folder not found"),
            ErrorKind::NotFound
        );
        assert_eq!(
            ErrorClassifier::classify_message("Unexpected token < in JSON"),
            ErrorKind::InvalidData
        );
        assert_eq!(
            ErrorClassifier::classify_message("Deadline exceeded"),
            ErrorKind::Timeout
        );
        assert_eq!(
            ErrorClassifier::classify_message("503 Service Unavailable"),
            ErrorKind::ServerError
        );
        assert_eq!(
            ErrorClassifier::classify_message("Something weird happened"),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_classify_uses_source_chain() {
        let err = MarksortError::RetriesExhausted {
            attempts: 4,
            source: Box::new(MarksortError::Provider {
                provider: Provider::Gemini,
                status: 503,
                message: "Service Unavailable".to_string(),
            }),
        };
        assert_eq!(ErrorClassifier::classify(&err), ErrorKind::ServerError);
    }

    #[test]
    fn test_user_message_template() {
        let ctx = error_context([(OPERATION_KEY, "categorizing bookmarks")]);
        let msg = ErrorClassifier::user_message(ErrorKind::RateLimit, &ctx);
        assert!(msg.starts_with("Rate limit reached while categorizing bookmarks. "));
        assert!(msg.ends_with('.'));

        let fallback = ErrorClassifier::user_message(ErrorKind::Unknown, &ErrorContext::new());
        assert!(fallback.contains("while processing your request"));
    }

    #[test]
    fn test_recovery_steps_never_empty() {
        for kind in [
            ErrorKind::Network,
            ErrorKind::Auth,
            ErrorKind::RateLimit,
            ErrorKind::Permission,
            ErrorKind::NotFound,
            ErrorKind::InvalidData,
            ErrorKind::Timeout,
            ErrorKind::ServerError,
            ErrorKind::Unknown,
        ] {
            let steps = ErrorClassifier::recovery_steps(kind);
            assert!((3..=4).contains(&steps.len()), "{kind} has {} steps", steps.len());
        }
    }

    #[test]
    fn test_context_error_record() {
        let err = MarksortError::llm("401 Unauthorized");
        let ctx = error_context([("operation", "testing the key"), ("provider", "openai")]);
        let classified = ContextError::from_error(&err, ctx);

        assert_eq!(classified.kind(), ErrorKind::Auth);
        let record = classified.to_record();
        assert_eq!(record["classification"], "auth");
        assert_eq!(record["context"]["provider"], "openai");
        assert!(record["recoverySteps"].as_array().unwrap().len() >= 3);
        assert!(record["originalError"]["message"]
            .as_str()
            .unwrap()
            .contains("401"));
        assert_eq!(classified.to_string(), classified.user_message);
    }
}
