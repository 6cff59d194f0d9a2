use super::classifier::ContextError;

/// Sink for user-facing error notifications
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, error: &ContextError);
}

/// Discards notifications
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ErrorNotifier for NoopNotifier {
    fn notify(&self, _error: &ContextError) {}
}

/// Emits notifications as warn-level log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl ErrorNotifier for TracingNotifier {
    fn notify(&self, error: &ContextError) {
        tracing::warn!(
            kind = %error.kind(),
            "{} ({})",
            error.user_message,
            error.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorContext;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_tracing_notifier_emits_one_warning() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));

        tracing::subscriber::with_default(subscriber, || {
            TracingNotifier.notify(&ContextError::new("503 overloaded", ErrorContext::new()));
            NoopNotifier.notify(&ContextError::new("503 overloaded", ErrorContext::new()));
        });

        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }
}
