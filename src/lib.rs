//! marksort - LLM Bookmark Organizer
//!
//! Sorts browser bookmarks into category folders by asking language models
//! to categorize them in batches.
//!
//! ## Core Features
//!
//! - **Request Queue**: priority scheduling with per-provider rate limits and
//!   jittered exponential backoff
//! - **Model Fallback**: an ordered cascade over every configured provider's
//!   models, strongest first
//! - **Response Repair**: tolerant parsing of fenced, truncated, or chatty
//!   model output
//! - **Error Aggregation**: classified, deduplicated user notifications
//!
//! ## Quick Start
//!
//! ```ignore
//! use marksort::ai::{ModelCatalog, ModelFallbackOrchestrator, RequestQueue, create_client};
//!
//! let client = create_client(&config.client_config(Provider::Gemini, &key))?;
//! let orchestrator =
//!     ModelFallbackOrchestrator::new(RequestQueue::default(), [client], &ModelCatalog::builtin());
//! let items = orchestrator.categorize(&batch, &[], &LearningHints::default()).await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: request queue, model clients, fallback cascade, response repair
//! - [`organizer`]: batching, folder realization, bookmark and settings stores
//! - [`errors`]: classification and aggregation of user-facing failures
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod organizer;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigLoader};
pub use types::error::{MarksortError, Result, ResultExt};
pub use types::{BookmarkNode, BookmarkRecord, CategorizedBookmark, LearningHints, Provider};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    ModelCatalog, ModelClient, ModelFallbackOrchestrator, RateLimiter, RequestQueue,
    ResponseRepairParser, SharedModelClient, TimeoutConfig, create_client, with_timeout,
};

// =============================================================================
// Organizer Re-exports
// =============================================================================

pub use errors::{ContextError, ErrorAggregator, ErrorClassifier, ErrorKind};
pub use organizer::{Categorizer, MemoryBookmarkStore, RunSession};
