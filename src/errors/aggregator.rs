//! Error Aggregation
//!
//! Collapses repeated failures that share a key inside a time window so the
//! user is notified once per burst instead of once per failed request.
//!
//! ## Lifecycle
//!
//! - `add` creates a record (returns `true`) or bumps an existing one (`false`)
//! - A record older than the window is treated as absent, even before `sweep`
//! - `spawn_sweeper` drops expired records on a fixed interval

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::classifier::{ContextError, ErrorContext, ErrorKind};
use super::notifier::{ErrorNotifier, NoopNotifier};
use crate::constants::errors as consts;

/// Deduplicated failure record
#[derive(Debug, Clone)]
pub struct AggregatedError {
    pub representative: ContextError,
    pub count: u32,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub contexts: Vec<ErrorContext>,
    first_seen: Instant,
}

/// Summary row for reporting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummaryEntry {
    pub key: String,
    pub kind: ErrorKind,
    pub message: String,
    pub user_message: String,
    pub count: u32,
    pub contexts: Vec<ErrorContext>,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
}

pub struct ErrorAggregator {
    window: Duration,
    records: RwLock<HashMap<String, AggregatedError>>,
    notifier: Arc<dyn ErrorNotifier>,
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new(Duration::from_secs(consts::DEDUP_WINDOW_SECS))
    }
}

impl ErrorAggregator {
    pub fn new(window: Duration) -> Self {
        Self::with_notifier(window, Arc::new(NoopNotifier))
    }

    pub fn with_notifier(window: Duration, notifier: Arc<dyn ErrorNotifier>) -> Self {
        Self {
            window,
            records: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an occurrence. Returns `true` when this is the first occurrence
    /// of `key` within the window.
    pub fn add(&self, key: &str, error: ContextError, context: ErrorContext) -> bool {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());

        if let Some(existing) = records.get_mut(key)
            && now.duration_since(existing.first_seen) <= self.window
        {
            existing.count += 1;
            existing.last_occurrence = Utc::now();
            existing.contexts.push(context);
            return false;
        }

        let stamp = Utc::now();
        records.insert(
            key.to_string(),
            AggregatedError {
                representative: error,
                count: 1,
                first_occurrence: stamp,
                last_occurrence: stamp,
                contexts: vec![context],
                first_seen: now,
            },
        );
        true
    }

    /// Classify, aggregate, and notify on the first occurrence only.
    ///
    /// Returns whether the notifier was invoked.
    pub fn report(
        &self,
        key: &str,
        error: &(dyn StdError + 'static),
        context: ErrorContext,
    ) -> bool {
        let classified = ContextError::from_error(error, context.clone());
        let first = self.add(key, classified.clone(), context);
        if first {
            self.notifier.notify(&classified);
        } else {
            tracing::debug!("Suppressed repeated error '{}': {}", key, classified.message);
        }
        first
    }

    /// Remove records older than the window. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let before = records.len();
        records.retain(|_, r| now.duration_since(r.first_seen) <= self.window);
        before - records.len()
    }

    /// Periodically sweep expired records until the aggregator is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(aggregator) => {
                        let dropped = aggregator.sweep();
                        if dropped > 0 {
                            tracing::trace!("Swept {} expired error records", dropped);
                        }
                    }
                    None => break,
                }
            }
        })
    }

    /// Current record for a key, if still inside the window
    pub fn get(&self, key: &str) -> Option<AggregatedError> {
        let now = Instant::now();
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        records
            .get(key)
            .filter(|r| now.duration_since(r.first_seen) <= self.window)
            .cloned()
    }

    /// Snapshot of all records, oldest first
    pub fn summary(&self) -> Vec<ErrorSummaryEntry> {
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        let mut entries: Vec<ErrorSummaryEntry> = records
            .iter()
            .map(|(key, r)| ErrorSummaryEntry {
                key: key.clone(),
                kind: r.representative.kind(),
                message: r.representative.message.clone(),
                user_message: r.representative.user_message.clone(),
                count: r.count,
                contexts: r.contexts.clone(),
                first_occurrence: r.first_occurrence,
                last_occurrence: r.last_occurrence,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.first_occurrence
                .cmp(&b.first_occurrence)
                .then_with(|| a.key.cmp(&b.key))
        });
        entries
    }

    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Create a shared aggregator
pub fn create_shared_aggregator(
    window: Duration,
    notifier: Arc<dyn ErrorNotifier>,
) -> Arc<ErrorAggregator> {
    Arc::new(ErrorAggregator::with_notifier(window, notifier))
}
