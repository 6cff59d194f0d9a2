//! User-facing error reporting: classification, deduplication, notification.

pub mod aggregator;
pub mod classifier;
pub mod notifier;

pub use aggregator::{AggregatedError, ErrorAggregator, ErrorSummaryEntry, create_shared_aggregator};
pub use classifier::{
    ContextError, ErrorClassifier, ErrorContext, ErrorKind, OPERATION_KEY, OriginalError,
    error_context,
};
pub use notifier::{ErrorNotifier, NoopNotifier, TracingNotifier};
