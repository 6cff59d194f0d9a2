//! Sliding Window Rate Limiter
//!
//! Per-provider admission control over a trailing 60 s window. The limiter
//! never blocks; the queue asks `can_admit` and, when refused, sleeps for
//! `next_available_delay` before asking again.
//!
//! Timestamps use `tokio::time::Instant` so paused-clock tests drive the window.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::constants::rate_limit as consts;
use crate::types::{MarksortError, Provider, Result};

/// Admission and capacity limits for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimit {
    /// Admissions allowed within the window
    pub rpm: u32,
    /// Maximum requests waiting in the queue
    pub max_queue_size: usize,
}

impl ProviderLimit {
    pub fn new(rpm: u32, max_queue_size: usize) -> Self {
        Self { rpm, max_queue_size }
    }

    /// Built-in limit for a provider
    pub fn default_for(provider: Provider) -> Self {
        let rpm = match provider {
            Provider::Gemini => consts::rpm::GEMINI,
            Provider::OpenAi => consts::rpm::OPENAI,
            Provider::Anthropic => consts::rpm::ANTHROPIC,
            Provider::Groq => consts::rpm::GROQ,
        };
        Self::new(rpm, consts::DEFAULT_MAX_QUEUE_SIZE)
    }
}

#[derive(Debug)]
struct ProviderRateState {
    limit: ProviderLimit,
    admissions: VecDeque<Instant>,
}

impl ProviderRateState {
    fn in_window(&self, now: Instant, window: Duration) -> impl Iterator<Item = &Instant> {
        self.admissions
            .iter()
            .filter(move |t| now.saturating_duration_since(**t) < window)
    }
}

pub struct RateLimiter {
    window: Duration,
    states: DashMap<Provider, ProviderRateState>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::with_limits(
            Provider::ALL
                .into_iter()
                .map(|p| (p, ProviderLimit::default_for(p))),
        )
    }
}

impl RateLimiter {
    /// Limiter with no providers configured
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            states: DashMap::new(),
        }
    }

    pub fn with_limits(limits: impl IntoIterator<Item = (Provider, ProviderLimit)>) -> Self {
        let limiter = Self::new(Duration::from_millis(consts::WINDOW_MS));
        for (provider, limit) in limits {
            limiter.configure(provider, limit);
        }
        limiter
    }

    /// Set or replace a provider's limits. Admission history is kept.
    pub fn configure(&self, provider: Provider, limit: ProviderLimit) {
        self.states
            .entry(provider)
            .and_modify(|s| s.limit = limit)
            .or_insert_with(|| ProviderRateState {
                limit,
                admissions: VecDeque::new(),
            });
    }

    pub fn limit(&self, provider: Provider) -> Result<ProviderLimit> {
        self.states
            .get(&provider)
            .map(|s| s.limit)
            .ok_or_else(|| MarksortError::UnknownProvider(provider.to_string()))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether one more request may start now
    pub fn can_admit(&self, provider: Provider) -> Result<bool> {
        let now = Instant::now();
        let state = self
            .states
            .get(&provider)
            .ok_or_else(|| MarksortError::UnknownProvider(provider.to_string()))?;
        let count = state.in_window(now, self.window).count();
        Ok(count < state.limit.rpm as usize)
    }

    /// Record that a request was dispatched at `at`
    pub fn record_admission(&self, provider: Provider, at: Instant) -> Result<()> {
        let mut state = self
            .states
            .get_mut(&provider)
            .ok_or_else(|| MarksortError::UnknownProvider(provider.to_string()))?;
        state.admissions.push_back(at);
        Ok(())
    }

    /// Predicted wait until the oldest admission leaves the window
    pub fn next_available_delay(&self, provider: Provider) -> Result<Duration> {
        let now = Instant::now();
        let state = self
            .states
            .get(&provider)
            .ok_or_else(|| MarksortError::UnknownProvider(provider.to_string()))?;

        let floor = Duration::from_millis(consts::MIN_DELAY_MS);
        let Some(oldest) = state.in_window(now, self.window).min().copied() else {
            // A zero limit refuses even with an empty window
            return Ok(if state.limit.rpm == 0 { floor } else { Duration::ZERO });
        };

        let remaining = self
            .window
            .saturating_sub(now.saturating_duration_since(oldest));
        let delay = remaining + Duration::from_millis(consts::SAFETY_MARGIN_MS);
        Ok(delay.max(floor))
    }

    /// Admissions currently inside the window
    pub fn current_rpm(&self, provider: Provider) -> usize {
        let now = Instant::now();
        self.states
            .get(&provider)
            .map(|s| s.in_window(now, self.window).count())
            .unwrap_or(0)
    }

    /// Drop admissions that left the window
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        for mut entry in self.states.iter_mut() {
            entry
                .admissions
                .retain(|t| now.saturating_duration_since(*t) < window);
        }
    }

    /// Forget every admission; limits are kept
    pub fn clear_history(&self) {
        for mut entry in self.states.iter_mut() {
            entry.admissions.clear();
        }
    }

    /// Total timestamps held, pruned or not
    pub fn history_len(&self) -> usize {
        self.states.iter().map(|e| e.admissions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single(rpm: u32) -> RateLimiter {
        RateLimiter::with_limits([(Provider::Gemini, ProviderLimit::new(rpm, 10))])
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_until_limit() {
        let limiter = single(2);
        assert!(limiter.can_admit(Provider::Gemini).unwrap());
        assert_eq!(
            limiter.next_available_delay(Provider::Gemini).unwrap(),
            Duration::ZERO
        );

        limiter.record_admission(Provider::Gemini, Instant::now()).unwrap();
        limiter.record_admission(Provider::Gemini, Instant::now()).unwrap();
        assert!(!limiter.can_admit(Provider::Gemini).unwrap());
        assert_eq!(limiter.current_rpm(Provider::Gemini), 2);

        let delay = limiter.next_available_delay(Provider::Gemini).unwrap();
        assert_eq!(delay, Duration::from_millis(60_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = single(1);
        limiter.record_admission(Provider::Gemini, Instant::now()).unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        assert!(!limiter.can_admit(Provider::Gemini).unwrap());
        assert_eq!(
            limiter.next_available_delay(Provider::Gemini).unwrap(),
            Duration::from_millis(15_100)
        );

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(limiter.can_admit(Provider::Gemini).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_keeps_window_entries() {
        let limiter = single(5);
        limiter.record_admission(Provider::Gemini, Instant::now()).unwrap();
        tokio::time::advance(Duration::from_secs(50)).await;
        limiter.record_admission(Provider::Gemini, Instant::now()).unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(limiter.history_len(), 2);
        limiter.prune();
        assert_eq!(limiter.history_len(), 1);
        assert_eq!(limiter.current_rpm(Provider::Gemini), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_never_reports_zero_delay() {
        let limiter = single(0);
        assert!(!limiter.can_admit(Provider::Gemini).unwrap());
        assert!(
            limiter.next_available_delay(Provider::Gemini).unwrap()
                >= Duration::from_millis(consts::MIN_DELAY_MS)
        );
    }

    #[test]
    fn test_unknown_provider() {
        let limiter = single(1);
        assert!(matches!(
            limiter.can_admit(Provider::Groq),
            Err(MarksortError::UnknownProvider(_))
        ));
        assert!(limiter.next_available_delay(Provider::Groq).is_err());
        assert_eq!(limiter.current_rpm(Provider::Groq), 0);
    }

    #[test]
    fn test_defaults_cover_all_providers() {
        let limiter = RateLimiter::default();
        assert_eq!(limiter.limit(Provider::Gemini).unwrap().rpm, 15);
        for provider in Provider::ALL {
            assert!(limiter.can_admit(provider).unwrap());
        }
    }

    proptest! {
        #[test]
        fn prop_admits_iff_below_limit(rpm in 1u32..30, recorded in 0usize..60) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let limiter = single(rpm);
                for _ in 0..recorded {
                    limiter.record_admission(Provider::Gemini, Instant::now()).unwrap();
                }
                let admitted = limiter.can_admit(Provider::Gemini).unwrap();
                assert_eq!(admitted, recorded < rpm as usize);
                if !admitted {
                    assert!(limiter.next_available_delay(Provider::Gemini).unwrap() > Duration::ZERO);
                }
            });
        }
    }
}
