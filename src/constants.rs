//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Request queue constants
pub mod queue {
    /// Default maximum retries per queued request
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 1_000;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 30_000;

    /// Proportional jitter applied to the exponential delay
    pub const JITTER_FACTOR: f64 = 0.3;

    /// Smaller second jitter pass to decorrelate concurrent callers
    pub const REFINEMENT_JITTER_FACTOR: f64 = 0.15;
}

/// Rate limiter constants
pub mod rate_limit {
    /// Sliding admission window (milliseconds)
    pub const WINDOW_MS: u64 = 60_000;

    /// Safety margin added to predicted wait times (milliseconds)
    pub const SAFETY_MARGIN_MS: u64 = 100;

    /// Floor for predicted wait times (milliseconds)
    pub const MIN_DELAY_MS: u64 = 100;

    /// Interval between history prunes (seconds)
    pub const PRUNE_INTERVAL_SECS: u64 = 10;

    /// Default maximum queued requests per provider
    pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

    /// Default requests-per-minute limits
    pub mod rpm {
        pub const GEMINI: u32 = 15;
        pub const OPENAI: u32 = 60;
        pub const ANTHROPIC: u32 = 50;
        pub const GROQ: u32 = 30;
    }
}

/// Model fallback constants
pub mod fallback {
    /// Pause between candidate attempts (milliseconds)
    pub const INTER_ATTEMPT_DELAY_MS: u64 = 1_000;

    /// Queue retries granted to a single candidate before falling through
    pub const RETRIES_PER_CANDIDATE: u32 = 0;

    /// Maximum folder suggestions requested from the model
    pub const MAX_SUGGESTED_CATEGORIES: usize = 12;
}

/// Error aggregation constants
pub mod errors {
    /// Deduplication window (seconds)
    pub const DEDUP_WINDOW_SECS: u64 = 60;

    /// Interval between aggregator sweeps (seconds)
    pub const SWEEP_INTERVAL_SECS: u64 = 30;
}

/// Organizer constants
pub mod organizer {
    /// Bookmarks per LLM request
    pub const DEFAULT_BATCH_SIZE: usize = 50;

    /// Category value the model must never assign
    pub const FORBIDDEN_CATEGORY: &str = "Other";

    /// Replacement for forbidden category values
    pub const FALLBACK_CATEGORY: &str = "Miscellaneous";

    /// Root folder that receives categorized bookmarks
    pub const ROOT_FOLDER: &str = "Organized";

    /// Grace period after a run ends during which move events are ignored (seconds)
    pub const SUPPRESSION_WINDOW_SECS: u64 = 5;

    /// How long an individually moved bookmark stays suppressed (seconds)
    pub const MOVED_ITEM_TTL_SECS: u64 = 30;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Maximum tokens requested from a model
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;

    /// Sampling temperature sent with every completion
    pub const DEFAULT_TEMPERATURE: f32 = 0.2;

    /// Caller-side deadline for one candidate, queue wait included (seconds)
    pub const CANDIDATE_DEADLINE_SECS: u64 = 300;

    /// Deadline for a single bookmark store operation (seconds)
    pub const STORE_TIMEOUT_SECS: u64 = 30;
}
