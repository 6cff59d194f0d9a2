//! Priority Request Queue
//!
//! Every outbound model call goes through one shared queue. Items are ordered
//! by `(priority, seq)` and drained by a single background task that waits for
//! rate-limit admission, executes, and retries transient failures with backoff.
//!
//! ## Drain Loop
//!
//! 1. Peek the head item
//! 2. If its provider admits a request: dequeue, record admission, execute
//! 3. Otherwise sleep for the limiter's predicted delay and re-check the same head
//! 4. A retryable failure goes back to the front and the loop sleeps for the backoff
//! 5. A request that panics fails with `Cancelled`; the loop carries on
//!
//! The head is never skipped, so a throttled provider holds back the others.
//!
//! ## Concurrency
//!
//! The `draining` flag lives under the same mutex as the items, so "queue is
//! empty, stop" and "item added, start if idle" cannot interleave. The mutex
//! is never held across an `.await`.

pub mod backoff;
pub mod metrics;
pub mod rate_limiter;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::constants::{queue as consts, rate_limit as limit_consts};
use crate::types::{MarksortError, Provider, Result};

pub use backoff::BackoffPolicy;
pub use metrics::{ProviderMetrics, QueueMetrics};
pub use rate_limiter::{ProviderLimit, RateLimiter};

use metrics::MetricsRecorder;

/// Re-invocable request producing the raw response text
pub type RequestThunk = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Wrap an async closure as a [`RequestThunk`]
pub fn request_thunk<F, Fut>(f: F) -> RequestThunk
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Scheduling priority (lower ordinal served first)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Per-item scheduling options
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub priority: Priority,
    /// Overrides the queue-wide retry budget for this item
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn priority(priority: Priority) -> Self {
        Self {
            priority,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Interval of the limiter prune task started by `spawn_maintenance`
    pub prune_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: consts::DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy::default(),
            prune_interval: Duration::from_secs(limit_consts::PRUNE_INTERVAL_SECS),
        }
    }
}

struct QueueItem {
    id: String,
    thunk: RequestThunk,
    provider: Provider,
    priority: Priority,
    seq: u64,
    retries: u32,
    max_retries: u32,
    enqueued_at: Instant,
    /// First dispatch; kept across retries
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
    responder: oneshot::Sender<Result<String>>,
}

impl QueueItem {
    /// Stamp completion; returns (time before first dispatch, total time)
    fn finish(&mut self) -> (Duration, Duration) {
        let completed = *self.completed_at.insert(Instant::now());
        let waited = self
            .started_at
            .map(|s| s.duration_since(self.enqueued_at))
            .unwrap_or_default();
        (waited, completed.duration_since(self.enqueued_at))
    }
}

#[derive(Default)]
struct QueueState {
    items: Vec<QueueItem>,
    draining: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    limiter: RateLimiter,
    metrics: MetricsRecorder,
    config: QueueConfig,
    next_seq: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Request queue mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Handle to a submitted request
pub struct PendingRequest {
    id: String,
    receiver: oneshot::Receiver<Result<String>>,
}

impl PendingRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the request to finish
    pub async fn wait(self) -> Result<String> {
        self.receiver.await.unwrap_or_else(|_| {
            Err(MarksortError::Cancelled(format!(
                "request {} dropped before completion",
                self.id
            )))
        })
    }
}

enum Step {
    Run(QueueItem),
    Wait(Provider, Duration),
    Reject(QueueItem, MarksortError),
}

/// Shared, cloneable request queue
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(RateLimiter::default(), QueueConfig::default())
    }
}

impl RequestQueue {
    pub fn new(limiter: RateLimiter, config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                limiter,
                metrics: MetricsRecorder::default(),
                config,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    /// Queue a request and start the drain loop if it is idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        thunk: RequestThunk,
        provider: Provider,
        options: EnqueueOptions,
    ) -> Result<PendingRequest> {
        let limit = self.inner.limiter.limit(provider)?;
        if limit.rpm == 0 {
            return Err(MarksortError::Config(format!(
                "{} has a rate limit of 0 requests per minute",
                provider
            )));
        }
        let (responder, receiver) = oneshot::channel();
        let id = Uuid::new_v4().to_string();

        let start_drain = {
            let mut state = self.inner.lock();
            let depth = state
                .items
                .iter()
                .filter(|i| i.provider == provider)
                .count();
            if depth >= limit.max_queue_size {
                return Err(MarksortError::QueueFull {
                    provider,
                    depth,
                    max: limit.max_queue_size,
                });
            }

            state.items.push(QueueItem {
                id: id.clone(),
                thunk,
                provider,
                priority: options.priority,
                seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
                retries: 0,
                max_retries: options.max_retries.unwrap_or(self.inner.config.max_retries),
                enqueued_at: Instant::now(),
                started_at: None,
                completed_at: None,
                responder,
            });
            state.items.sort_by_key(|i| (i.priority, i.seq));
            self.inner.metrics.record_enqueued();

            trace!(
                id = %id,
                provider = %provider,
                priority = ?options.priority,
                depth = state.items.len(),
                "Request enqueued"
            );

            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            tokio::spawn(drain(Arc::clone(&self.inner)));
        }

        Ok(PendingRequest { id, receiver })
    }

    /// Queue a request and wait for its result
    pub async fn enqueue(
        &self,
        thunk: RequestThunk,
        provider: Provider,
        options: EnqueueOptions,
    ) -> Result<String> {
        self.submit(thunk, provider, options)?.wait().await
    }

    /// Items waiting (not in flight)
    pub fn depth(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn metrics(&self) -> QueueMetrics {
        let depth = self.depth();
        let limiter = &self.inner.limiter;
        self.inner.metrics.snapshot(depth, |provider| {
            let limit = limiter.limit(provider).ok();
            (
                limiter.current_rpm(provider),
                limit.map(|l| l.rpm).unwrap_or(0),
                limit.map(|l| l.max_queue_size).unwrap_or(0),
            )
        })
    }

    /// Reset counters and admission history. Queued work is untouched.
    pub fn clear_metrics(&self) {
        self.inner.metrics.reset();
        self.inner.limiter.clear_history();
    }

    /// Periodically prune limiter history until the queue is dropped
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.prune_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => inner.limiter.prune(),
                    None => break,
                }
            }
        })
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let step = {
            let mut state = inner.lock();
            let Some(head) = state.items.first() else {
                state.draining = false;
                trace!("Request queue drained");
                return;
            };
            let provider = head.provider;
            match inner.limiter.can_admit(provider) {
                Ok(true) => {
                    let item = state.items.remove(0);
                    match inner.limiter.record_admission(provider, Instant::now()) {
                        Ok(()) => Step::Run(item),
                        Err(e) => Step::Reject(item, e),
                    }
                }
                Ok(false) => {
                    let floor = Duration::from_millis(limit_consts::MIN_DELAY_MS);
                    let delay = inner
                        .limiter
                        .next_available_delay(provider)
                        .map_or(floor, |d| d.max(floor));
                    Step::Wait(provider, delay)
                }
                Err(e) => Step::Reject(state.items.remove(0), e),
            }
        };

        match step {
            Step::Wait(provider, delay) => {
                inner.metrics.record_throttled(provider);
                debug!(
                    provider = %provider,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limit reached, waiting for admission"
                );
                sleep(delay).await;
            }
            Step::Reject(item, err) => {
                inner.metrics.record_failure(item.provider);
                let _ = item.responder.send(Err(err));
            }
            Step::Run(item) => execute(&inner, item).await,
        }
    }
}

async fn execute(inner: &Inner, mut item: QueueItem) {
    let provider = item.provider;
    inner.metrics.record_dispatch(provider);
    let started = Instant::now();
    item.started_at.get_or_insert(started);

    debug!(
        id = %item.id,
        provider = %provider,
        attempt = item.retries + 1,
        waited_ms = started.duration_since(item.enqueued_at).as_millis() as u64,
        "Dispatching request"
    );

    let thunk = Arc::clone(&item.thunk);
    let outcome = AssertUnwindSafe(async move { thunk().await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(MarksortError::Cancelled(format!(
                "request panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

    match outcome {
        Ok(text) => {
            let latency = started.elapsed().as_millis() as u64;
            inner.metrics.record_success(provider, latency);
            let (waited, total) = item.finish();
            debug!(
                id = %item.id,
                provider = %provider,
                latency_ms = latency,
                queued_ms = waited.as_millis() as u64,
                total_ms = total.as_millis() as u64,
                "Request succeeded"
            );
            let _ = item.responder.send(Ok(text));
        }
        Err(err) if err.is_retryable() && item.retries < item.max_retries => {
            item.retries += 1;
            inner.metrics.record_retry();
            let delay = inner.config.backoff.delay(item.retries);
            warn!(
                id = %item.id,
                provider = %provider,
                retry = item.retries,
                max_retries = item.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request failed, retrying after backoff"
            );
            inner.lock().items.insert(0, item);
            sleep(delay).await;
        }
        Err(err) => {
            inner.metrics.record_failure(provider);
            let err = if err.is_retryable() {
                MarksortError::RetriesExhausted {
                    attempts: item.retries + 1,
                    source: Box::new(err),
                }
            } else {
                err
            };
            let (_, total) = item.finish();
            warn!(
                id = %item.id,
                provider = %provider,
                total_ms = total.as_millis() as u64,
                error = %err,
                "Request failed"
            );
            let _ = item.responder.send(Err(err));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn gemini_queue(rpm: u32, max_queue_size: usize) -> RequestQueue {
        RequestQueue::new(
            RateLimiter::with_limits([(Provider::Gemini, ProviderLimit::new(rpm, max_queue_size))]),
            QueueConfig::default(),
        )
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> RequestThunk {
        let log = Arc::clone(log);
        request_thunk(move || {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(label);
                Ok(label.to_string())
            }
        })
    }

    fn failing(calls: &Arc<AtomicU32>, status: u16) -> RequestThunk {
        let calls = Arc::clone(calls);
        request_thunk(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(MarksortError::Provider {
                    provider: Provider::Gemini,
                    status,
                    message: "failure".to_string(),
                })
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_before_drain() {
        let queue = gemini_queue(60, 10);
        let log = Arc::new(Mutex::new(Vec::new()));

        let pending = vec![
            queue.submit(recording(&log, "low"), Provider::Gemini, EnqueueOptions::priority(Priority::Low)).unwrap(),
            queue.submit(recording(&log, "high"), Provider::Gemini, EnqueueOptions::priority(Priority::High)).unwrap(),
            queue.submit(recording(&log, "normal-1"), Provider::Gemini, EnqueueOptions::default()).unwrap(),
            queue.submit(recording(&log, "normal-2"), Provider::Gemini, EnqueueOptions::default()).unwrap(),
        ];
        for p in pending {
            p.wait().await.unwrap();
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec!["high", "normal-1", "normal-2", "low"]
        );
        assert_eq!(queue.metrics().total_requests, 4);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let queue = gemini_queue(60, 10);
        let calls = Arc::new(AtomicU32::new(0));

        let result = queue
            .enqueue(failing(&calls, 503), Provider::Gemini, EnqueueOptions::default())
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(MarksortError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert_eq!(source.status(), Some(503));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other.map(|_| ())),
        }

        let metrics = queue.metrics();
        assert_eq!(metrics.retried_requests, 3);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.provider(Provider::Gemini).unwrap().requests, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_not_retried() {
        let queue = gemini_queue(60, 10);
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let err = queue
            .enqueue(failing(&calls, 401), Provider::Gemini, EnqueueOptions::default())
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(err.is_request_invalid());
        assert_eq!(queue.metrics().retried_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_with_backoff() {
        let queue = gemini_queue(60, 10);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let thunk = request_thunk(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MarksortError::llm("429 Too Many Requests"))
                } else {
                    Ok("done".to_string())
                }
            }
        });

        let start = Instant::now();
        let text = queue
            .enqueue(thunk, Provider::Gemini, EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(text, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // retry 1 waits at least 1000ms, retry 2 at least 1400ms
        assert!(start.elapsed() >= Duration::from_millis(2400));
        assert_eq!(queue.metrics().retried_requests, 2);
        assert_eq!(queue.metrics().successful_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_item_retry_override() {
        let queue = gemini_queue(60, 10);
        let calls = Arc::new(AtomicU32::new(0));

        let err = queue
            .enqueue(
                failing(&calls, 503),
                Provider::Gemini,
                EnqueueOptions::default().with_max_retries(0),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, MarksortError::RetriesExhausted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_rejection() {
        let queue = gemini_queue(60, 2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = queue.submit(recording(&log, "a"), Provider::Gemini, EnqueueOptions::default()).unwrap();
        let second = queue.submit(recording(&log, "b"), Provider::Gemini, EnqueueOptions::default()).unwrap();
        let third = queue.submit(recording(&log, "c"), Provider::Gemini, EnqueueOptions::default());

        assert!(matches!(
            third,
            Err(MarksortError::QueueFull { depth: 2, max: 2, .. })
        ));
        first.wait().await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(queue.metrics().total_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_provider_rejected() {
        let queue = gemini_queue(60, 10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = queue.submit(recording(&log, "x"), Provider::Groq, EnqueueOptions::default());
        assert!(matches!(result, Err(MarksortError::UnknownProvider(_))));
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_request_does_not_stall_queue() {
        let queue = gemini_queue(60, 10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let exploding = request_thunk(|| async {
            let fail = true;
            if fail {
                panic!("client bug");
            }
            Ok(String::new())
        });

        let first = queue.submit(exploding, Provider::Gemini, EnqueueOptions::default()).unwrap();
        let second = queue.submit(recording(&log, "after"), Provider::Gemini, EnqueueOptions::default()).unwrap();

        let err = first.wait().await.unwrap_err();
        assert!(matches!(&err, MarksortError::Cancelled(msg) if msg.contains("client bug")));
        assert!(!err.is_retryable());
        assert_eq!(second.wait().await.unwrap(), "after");

        // The drain loop restarts for later submissions
        let text = queue
            .enqueue(recording(&log, "later"), Provider::Gemini, EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "later");

        let metrics = queue.metrics();
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.retried_requests, 0);
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_rate_limit_rejected_at_submit() {
        let queue = gemini_queue(0, 10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = queue.submit(recording(&log, "x"), Provider::Gemini, EnqueueOptions::default());
        assert!(matches!(result, Err(MarksortError::Config(_))));
        assert_eq!(queue.depth(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_head_waits_for_window() {
        let queue = gemini_queue(1, 10);
        let log = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let a = queue.submit(recording(&log, "a"), Provider::Gemini, EnqueueOptions::default()).unwrap();
        let b = queue.submit(recording(&log, "b"), Provider::Gemini, EnqueueOptions::default()).unwrap();
        a.wait().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        b.wait().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        let metrics = queue.metrics();
        let gemini = metrics.provider(Provider::Gemini).unwrap();
        assert!(gemini.throttled >= 1);
        assert_eq!(gemini.rpm_limit, 1);
        assert!(metrics.throttled_requests >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_metrics() {
        let queue = gemini_queue(60, 10);
        let log = Arc::new(Mutex::new(Vec::new()));
        queue
            .enqueue(recording(&log, "a"), Provider::Gemini, EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(queue.metrics().provider(Provider::Gemini).unwrap().current_rpm, 1);

        queue.clear_metrics();
        let metrics = queue.metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.provider(Provider::Gemini).unwrap().current_rpm, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_prunes_history() {
        let queue = gemini_queue(60, 10);
        let handle = queue.spawn_maintenance();
        queue
            .limiter()
            .record_admission(Provider::Gemini, Instant::now())
            .unwrap();

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(queue.limiter().history_len(), 0);

        drop(queue);
        handle.await.unwrap();
    }
}
