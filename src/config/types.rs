//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! API keys are never serialized and are redacted in debug output.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ai::fallback::FallbackConfig;
use crate::ai::provider::ClientConfig;
use crate::ai::queue::{BackoffPolicy, ProviderLimit, QueueConfig, RateLimiter};
use crate::ai::timeout::TimeoutConfig;
use crate::ai::validation::CategoryRules;
use crate::constants::{errors, fallback, network, organizer, queue, rate_limit};
use crate::types::{MarksortError, Provider, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Provider credentials and request settings
    pub llm: LlmConfig,

    /// Request queue retry settings
    pub queue: QueueSettings,

    /// Per-provider admission limits
    pub rate_limits: RateLimitsConfig,

    /// Model cascade settings
    pub fallback: FallbackSettings,

    /// Batching, folders, and category rules
    pub organizer: OrganizerConfig,

    /// Error aggregation
    pub errors: ErrorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            queue: QueueSettings::default(),
            rate_limits: RateLimitsConfig::default(),
            fallback: FallbackSettings::default(),
            organizer: OrganizerConfig::default(),
            errors: ErrorsConfig::default(),
        }
    }
}

fn invalid(message: impl Into<String>) -> MarksortError {
    MarksortError::Config(message.into())
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.timeout_secs == 0 {
            return Err(invalid("LLM timeout_secs must be greater than 0"));
        }
        if self.llm.max_output_tokens == 0 {
            return Err(invalid("LLM max_output_tokens must be greater than 0"));
        }

        for (name, value) in [
            ("jitter", self.queue.jitter),
            ("refinement_jitter", self.queue.refinement_jitter),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!(
                    "Queue {} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        if self.queue.base_delay_ms == 0 || self.queue.base_delay_ms > self.queue.max_delay_ms {
            return Err(invalid(format!(
                "Queue delays must satisfy 0 < base_delay_ms <= max_delay_ms, got {} and {}",
                self.queue.base_delay_ms, self.queue.max_delay_ms
            )));
        }

        for provider in Provider::ALL {
            let limit = self.rate_limits.get(provider);
            if limit.rpm == 0 || limit.max_queue_size == 0 {
                return Err(invalid(format!(
                    "Rate limit for {} must have rpm and max_queue_size greater than 0",
                    provider
                )));
            }
        }

        if self.fallback.candidate_deadline_secs == 0 {
            return Err(invalid("Fallback candidate_deadline_secs must be greater than 0"));
        }

        if self.organizer.batch_size == 0 {
            return Err(invalid("Organizer batch_size must be greater than 0"));
        }
        if self.organizer.root_folder.trim().is_empty() {
            return Err(invalid("Organizer root_folder must not be empty"));
        }
        if self
            .organizer
            .category_rules()
            .is_forbidden(&self.organizer.fallback_category)
        {
            return Err(invalid(format!(
                "Organizer fallback_category '{}' is itself forbidden",
                self.organizer.fallback_category
            )));
        }

        if self.errors.dedup_window_secs == 0 || self.errors.sweep_interval_secs == 0 {
            return Err(invalid(
                "Errors dedup_window_secs and sweep_interval_secs must be greater than 0",
            ));
        }

        Ok(())
    }

    /// API key from config, else the provider's conventional environment variable
    pub fn api_key(&self, provider: Provider) -> Option<SecretString> {
        self.llm
            .provider(provider)
            .api_key
            .clone()
            .or_else(|| std::env::var(provider.env_key()).ok())
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
    }

    /// Client settings for `provider` using `api_key`
    pub fn client_config(&self, provider: Provider, api_key: &str) -> ClientConfig {
        let mut config = ClientConfig::new(provider, api_key);
        config.api_base = self.llm.provider(provider).api_base.clone();
        config.timeout_secs = self.llm.timeout_secs;
        config
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Never written back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Endpoint override (proxies, tests)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// HTTP request timeout in seconds
    pub timeout_secs: u64,

    /// Sampling temperature (0.0 = deterministic)
    pub temperature: f32,

    pub max_output_tokens: u32,

    pub gemini: ProviderSettings,
    pub openai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub groq: ProviderSettings,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: network::DEFAULT_TEMPERATURE,
            max_output_tokens: network::DEFAULT_MAX_OUTPUT_TOKENS,
            gemini: ProviderSettings::default(),
            openai: ProviderSettings::default(),
            anthropic: ProviderSettings::default(),
            groq: ProviderSettings::default(),
        }
    }
}

impl LlmConfig {
    pub fn provider(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::Gemini => &self.gemini,
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Groq => &self.groq,
        }
    }
}

// =============================================================================
// Queue Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// First-pass backoff jitter (fraction)
    pub jitter: f64,
    /// Second-pass backoff jitter (fraction, 0 disables)
    pub refinement_jitter: f64,
    pub prune_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_retries: queue::DEFAULT_MAX_RETRIES,
            base_delay_ms: queue::BASE_DELAY_MS,
            max_delay_ms: queue::MAX_DELAY_MS,
            jitter: queue::JITTER_FACTOR,
            refinement_jitter: queue::REFINEMENT_JITTER_FACTOR,
            prune_interval_secs: rate_limit::PRUNE_INTERVAL_SECS,
        }
    }
}

impl QueueSettings {
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.base_delay_ms),
                max: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
                refinement: self.refinement_jitter,
            },
            prune_interval: Duration::from_secs(self.prune_interval_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub rpm: u32,
    pub max_queue_size: usize,
}

impl From<ProviderLimit> for RateLimitConfig {
    fn from(limit: ProviderLimit) -> Self {
        Self {
            rpm: limit.rpm,
            max_queue_size: limit.max_queue_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub gemini: RateLimitConfig,
    pub openai: RateLimitConfig,
    pub anthropic: RateLimitConfig,
    pub groq: RateLimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            gemini: ProviderLimit::default_for(Provider::Gemini).into(),
            openai: ProviderLimit::default_for(Provider::OpenAi).into(),
            anthropic: ProviderLimit::default_for(Provider::Anthropic).into(),
            groq: ProviderLimit::default_for(Provider::Groq).into(),
        }
    }
}

impl RateLimitsConfig {
    pub fn get(&self, provider: Provider) -> RateLimitConfig {
        match provider {
            Provider::Gemini => self.gemini,
            Provider::OpenAi => self.openai,
            Provider::Anthropic => self.anthropic,
            Provider::Groq => self.groq,
        }
    }

    pub fn to_limiter(&self) -> RateLimiter {
        RateLimiter::with_limits(Provider::ALL.into_iter().map(|p| {
            let limit = self.get(p);
            (p, ProviderLimit::new(limit.rpm, limit.max_queue_size))
        }))
    }
}

// =============================================================================
// Fallback Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Queue retries granted to one candidate before falling through
    pub retries_per_candidate: u32,
    pub inter_attempt_delay_ms: u64,
    /// Caller-side deadline per candidate, queue wait included
    pub candidate_deadline_secs: u64,
    pub max_suggested_categories: usize,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            retries_per_candidate: fallback::RETRIES_PER_CANDIDATE,
            inter_attempt_delay_ms: fallback::INTER_ATTEMPT_DELAY_MS,
            candidate_deadline_secs: network::CANDIDATE_DEADLINE_SECS,
            max_suggested_categories: fallback::MAX_SUGGESTED_CATEGORIES,
        }
    }
}

impl FallbackSettings {
    pub fn to_fallback_config(&self, llm: &LlmConfig) -> FallbackConfig {
        FallbackConfig {
            retries_per_candidate: self.retries_per_candidate,
            inter_attempt_delay: Duration::from_millis(self.inter_attempt_delay_ms),
            max_output_tokens: llm.max_output_tokens,
            temperature: llm.temperature,
            timeouts: TimeoutConfig {
                candidate: Duration::from_secs(self.candidate_deadline_secs),
                ..TimeoutConfig::default()
            },
        }
    }
}

// =============================================================================
// Organizer Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerConfig {
    /// Used when the settings store has no `batchSize`
    pub batch_size: usize,
    pub root_folder: String,
    pub forbidden_categories: Vec<String>,
    pub fallback_category: String,
    pub suppression_window_secs: u64,
    pub moved_item_ttl_secs: u64,
    /// JSON settings store; `.marksort/settings.json` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self {
            batch_size: organizer::DEFAULT_BATCH_SIZE,
            root_folder: organizer::ROOT_FOLDER.to_string(),
            forbidden_categories: vec![organizer::FORBIDDEN_CATEGORY.to_string()],
            fallback_category: organizer::FALLBACK_CATEGORY.to_string(),
            suppression_window_secs: organizer::SUPPRESSION_WINDOW_SECS,
            moved_item_ttl_secs: organizer::MOVED_ITEM_TTL_SECS,
            settings_file: None,
        }
    }
}

impl OrganizerConfig {
    pub fn category_rules(&self) -> CategoryRules {
        CategoryRules {
            forbidden: self.forbidden_categories.clone(),
            fallback: self.fallback_category.clone(),
        }
    }
}

// =============================================================================
// Error Aggregation Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    pub dedup_window_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: errors::DEDUP_WINDOW_SECS,
            sweep_interval_secs: errors::SWEEP_INTERVAL_SECS,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
