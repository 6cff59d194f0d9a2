//! Caller-Side Deadlines
//!
//! Queue results are raced against a timer. Losing the race abandons the
//! result only; work the queue already admitted keeps running.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::{TimeoutConfig, with_timeout};
//!
//! let config = TimeoutConfig::default();
//! let text = with_timeout(
//!     config.candidate,
//!     queue.enqueue(thunk, provider, options),
//!     "gemini/gemini-2.5-flash"
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::constants::network as net_constants;
use crate::types::{MarksortError, Result};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// One model candidate, including time spent waiting in the queue (default: 5 minutes)
    pub candidate: Duration,
    /// One bookmark store operation (default: 30 seconds)
    pub store: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            candidate: Duration::from_secs(net_constants::CANDIDATE_DEADLINE_SECS),
            store: Duration::from_secs(net_constants::STORE_TIMEOUT_SECS),
        }
    }
}

/// Execute an async operation with a timeout
///
/// Returns `MarksortError::Timeout` if the operation doesn't complete within
/// `timeout`. The error is retryable, so the fallback cascade moves on.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(MarksortError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.candidate.as_secs(), 300);
        assert_eq!(config.store.as_secs(), 30);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, MarksortError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, MarksortError>(42)
            },
            "slow operation",
        )
        .await;
        let err = result.unwrap_err();
        assert!(matches!(err, MarksortError::Timeout { .. }));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("slow operation"));
    }
}
