//! Request Queue Metrics
//!
//! Atomic totals plus per-provider counters in a DashMap. Reading metrics never
//! mutates state; `reset` zeroes counters without touching queued work.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::types::Provider;

#[derive(Debug, Default, Clone)]
struct ProviderCounters {
    requests: u64,
    successes: u64,
    failures: u64,
    throttled: u64,
    avg_latency_ms: f64,
    last_request_at: Option<i64>,
}

/// Per-provider view returned by [`QueueMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    /// Execution attempts, retries included
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub throttled: u64,
    pub avg_latency_ms: f64,
    pub current_rpm: usize,
    pub rpm_limit: u32,
    pub max_queue_size: usize,
    /// Epoch milliseconds of the last dispatch
    pub last_request_at: Option<i64>,
}

/// Snapshot of queue activity
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub queue_depth: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub throttled_requests: u64,
    pub providers: Vec<(Provider, ProviderMetrics)>,
}

impl QueueMetrics {
    pub fn provider(&self, provider: Provider) -> Option<&ProviderMetrics> {
        self.providers
            .iter()
            .find(|(p, _)| *p == provider)
            .map(|(_, m)| m)
    }

    /// Format for display
    pub fn display(&self) -> String {
        let mut out = format!(
            "Queue depth: {}\n\
             Requests: {} (ok: {}, failed: {}, retried: {}, throttled: {})",
            self.queue_depth,
            self.total_requests,
            self.successful_requests,
            self.failed_requests,
            self.retried_requests,
            self.throttled_requests
        );
        for (provider, m) in &self.providers {
            if m.requests == 0 && m.throttled == 0 {
                continue;
            }
            out.push_str(&format!(
                "\n  {:<10} {} req, {} ok, {} failed, {:.0}ms avg, {}/{} rpm",
                provider.as_str(),
                m.requests,
                m.successes,
                m.failures,
                m.avg_latency_ms,
                m.current_rpm,
                m.rpm_limit
            ));
        }
        out
    }
}

#[derive(Default)]
pub(crate) struct MetricsRecorder {
    total_requests: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    throttled: AtomicU64,
    providers: DashMap<Provider, ProviderCounters>,
}

impl MetricsRecorder {
    pub(crate) fn record_enqueued(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, provider: Provider) {
        let mut counters = self.providers.entry(provider).or_default();
        counters.requests += 1;
        counters.last_request_at = Some(Utc::now().timestamp_millis());
    }

    pub(crate) fn record_success(&self, provider: Provider, latency_ms: u64) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        let mut counters = self.providers.entry(provider).or_default();
        counters.successes += 1;
        let n = counters.successes as f64;
        counters.avg_latency_ms = (counters.avg_latency_ms * (n - 1.0) + latency_ms as f64) / n;
    }

    pub(crate) fn record_failure(&self, provider: Provider) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.providers.entry(provider).or_default().failures += 1;
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_throttled(&self, provider: Provider) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
        self.providers.entry(provider).or_default().throttled += 1;
    }

    pub(crate) fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.retried.store(0, Ordering::Relaxed);
        self.throttled.store(0, Ordering::Relaxed);
        self.providers.clear();
    }

    /// Build a snapshot; limiter-derived fields are filled by the caller
    pub(crate) fn snapshot(
        &self,
        queue_depth: usize,
        mut provider_extra: impl FnMut(Provider) -> (usize, u32, usize),
    ) -> QueueMetrics {
        let providers = Provider::ALL
            .into_iter()
            .map(|provider| {
                let counters = self
                    .providers
                    .get(&provider)
                    .map(|c| c.clone())
                    .unwrap_or_default();
                let (current_rpm, rpm_limit, max_queue_size) = provider_extra(provider);
                (
                    provider,
                    ProviderMetrics {
                        requests: counters.requests,
                        successes: counters.successes,
                        failures: counters.failures,
                        throttled: counters.throttled,
                        avg_latency_ms: counters.avg_latency_ms,
                        current_rpm,
                        rpm_limit,
                        max_queue_size,
                        last_request_at: counters.last_request_at,
                    },
                )
            })
            .collect();

        QueueMetrics {
            queue_depth,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful.load(Ordering::Relaxed),
            failed_requests: self.failed.load(Ordering::Relaxed),
            retried_requests: self.retried.load(Ordering::Relaxed),
            throttled_requests: self.throttled.load(Ordering::Relaxed),
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average_latency() {
        let recorder = MetricsRecorder::default();
        recorder.record_dispatch(Provider::Gemini);
        recorder.record_success(Provider::Gemini, 100);
        recorder.record_dispatch(Provider::Gemini);
        recorder.record_success(Provider::Gemini, 300);
        recorder.record_dispatch(Provider::Gemini);
        recorder.record_success(Provider::Gemini, 200);

        let snapshot = recorder.snapshot(0, |_| (0, 15, 100));
        let gemini = snapshot.provider(Provider::Gemini).unwrap();
        assert_eq!(gemini.requests, 3);
        assert!((gemini.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!(gemini.last_request_at.is_some());
        assert_eq!(snapshot.successful_requests, 3);
    }

    #[test]
    fn test_reset_clears_counters() {
        let recorder = MetricsRecorder::default();
        recorder.record_enqueued();
        recorder.record_dispatch(Provider::Groq);
        recorder.record_failure(Provider::Groq);
        recorder.record_throttled(Provider::Groq);
        recorder.record_retry();

        recorder.reset();
        let snapshot = recorder.snapshot(2, |_| (0, 30, 100));
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.retried_requests, 0);
        assert_eq!(snapshot.queue_depth, 2);
        assert_eq!(snapshot.provider(Provider::Groq).unwrap().failures, 0);
    }

    #[test]
    fn test_display_lists_active_providers() {
        let recorder = MetricsRecorder::default();
        recorder.record_dispatch(Provider::Anthropic);
        let text = recorder.snapshot(0, |_| (1, 50, 100)).display();
        assert!(text.contains("anthropic"));
        assert!(!text.contains("gemini"));
    }
}
