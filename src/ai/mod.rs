//! AI Integration Layer
//!
//! Request orchestration for model-driven bookmark categorization:
//! - `queue`: priority queue with rate-limit admission and retry backoff
//! - `provider`: HTTP model clients and the model catalog
//! - `fallback`: the candidate cascade
//! - `validation`: response repair and semantic checks

pub mod fallback;
pub mod prompt;
pub mod provider;
pub mod queue;
pub mod timeout;
pub mod validation;

pub use fallback::{FallbackConfig, ModelFallbackOrchestrator};
pub use prompt::{PromptBuilder, PromptSection, PromptTemplates, SYSTEM_PROMPT};
pub use provider::{
    Capability, ClientConfig, CompletionRequest, ModelCandidate, ModelCatalog, ModelClient,
    SharedModelClient, SizeClass, create_client,
};
pub use queue::{
    BackoffPolicy, EnqueueOptions, PendingRequest, Priority, ProviderLimit, ProviderMetrics,
    QueueConfig, QueueMetrics, RateLimiter, RequestQueue, RequestThunk, request_thunk,
};
pub use timeout::{TimeoutConfig, with_timeout};
pub use validation::{CategoryRules, JsonRepairer, ResponseRepairParser};
