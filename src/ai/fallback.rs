//! Model Fallback Cascade
//!
//! Tries model candidates strongest first until one returns a usable answer.
//! Every attempt goes through the shared [`RequestQueue`], so rate limits and
//! priorities apply to fallbacks as well.
//!
//! ## Strategy
//!
//! 1. Candidates: catalog models of every provider with a client, sorted by
//!    capability weight (stable)
//! 2. Submit through the queue with a caller-side deadline
//! 3. Success: parse and validate, return immediately
//! 4. Request invalid (400/401/403, bad key): abort the whole cascade
//! 5. Truncated response on a batch larger than one: split in half and retry
//!    both halves on the same candidate
//! 6. Anything else: remember the error, pause, try the next candidate
//!
//! Each candidate gets `retries_per_candidate` queue retries (default 0), so a
//! transient failure on one model becomes a fallback event rather than a
//! queue-level retry of the same model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::prompt::{PromptTemplates, SYSTEM_PROMPT};
use super::provider::{CompletionRequest, ModelCandidate, ModelCatalog, SharedModelClient};
use super::queue::{EnqueueOptions, Priority, RequestQueue, request_thunk};
use super::timeout::{TimeoutConfig, with_timeout};
use super::validation::ResponseRepairParser;
use crate::constants::{fallback as consts, network};
use crate::types::{
    BookmarkRecord, CategorizedBookmark, LearningHints, MarksortError, Provider, Result,
};

#[derive(Debug, Clone)]
pub struct FallbackConfig {
    /// Queue retries granted to one candidate
    pub retries_per_candidate: u32,
    /// Pause before moving to the next candidate
    pub inter_attempt_delay: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeouts: TimeoutConfig,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            retries_per_candidate: consts::RETRIES_PER_CANDIDATE,
            inter_attempt_delay: Duration::from_millis(consts::INTER_ATTEMPT_DELAY_MS),
            max_output_tokens: network::DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: network::DEFAULT_TEMPERATURE,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Ordered model cascade over a shared request queue
pub struct ModelFallbackOrchestrator {
    queue: RequestQueue,
    clients: HashMap<Provider, SharedModelClient>,
    candidates: Vec<ModelCandidate>,
    parser: ResponseRepairParser,
    config: FallbackConfig,
}

impl ModelFallbackOrchestrator {
    /// Build the candidate list from `catalog`, keeping only providers with a client
    pub fn new(
        queue: RequestQueue,
        clients: impl IntoIterator<Item = SharedModelClient>,
        catalog: &ModelCatalog,
    ) -> Self {
        let clients: HashMap<Provider, SharedModelClient> = clients
            .into_iter()
            .map(|client| (client.provider(), client))
            .collect();
        let candidates = catalog.candidates(|p| clients.contains_key(&p));

        debug!(
            candidates = candidates.len(),
            providers = clients.len(),
            "Model cascade prepared"
        );

        Self {
            queue,
            clients,
            candidates,
            parser: ResponseRepairParser::default(),
            config: FallbackConfig::default(),
        }
    }

    pub fn with_parser(mut self, parser: ResponseRepairParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_config(mut self, config: FallbackConfig) -> Self {
        self.config = config;
        self
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.candidates
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Categorize one batch, falling back across candidates
    #[instrument(skip_all, fields(batch = batch.len(), candidates = self.candidates.len()))]
    pub async fn categorize(
        &self,
        batch: &[BookmarkRecord],
        categories: &[String],
        hints: &LearningHints,
    ) -> Result<Vec<CategorizedBookmark>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        self.cascade(|candidate| self.categorize_with(candidate, batch, categories, hints))
            .await
    }

    /// Ask for up to `max` folder names that fit `sample`
    #[instrument(skip_all, fields(sample = sample.len(), max = max))]
    pub async fn suggest_categories(
        &self,
        sample: &[BookmarkRecord],
        max: usize,
    ) -> Result<Vec<String>> {
        self.cascade(|candidate| {
            async move {
                let prompt = PromptTemplates::suggest_categories(sample, max, self.parser.rules());
                let raw = self.request(candidate, prompt, Priority::High).await?;
                self.parser.parse_category_names(&raw, max)
            }
            .boxed()
        })
        .await
    }

    async fn cascade<'a, T>(
        &'a self,
        attempt: impl Fn(&'a ModelCandidate) -> BoxFuture<'a, Result<T>>,
    ) -> Result<T> {
        if self.candidates.is_empty() {
            return Err(MarksortError::NoCandidates);
        }

        let mut last: Option<(String, MarksortError)> = None;
        let mut attempted = 0;

        for (index, candidate) in self.candidates.iter().enumerate() {
            attempted += 1;
            debug!(candidate = %candidate, attempt = attempted, "Trying model candidate");

            match attempt(candidate).await {
                Ok(value) => {
                    info!(candidate = %candidate, attempt = attempted, "Model candidate succeeded");
                    return Ok(value);
                }
                Err(err) if err.is_request_invalid() => {
                    warn!(
                        candidate = %candidate,
                        error = %err,
                        "Request rejected by provider, aborting cascade"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(candidate = %candidate, error = %err, "Model candidate failed");
                    last = Some((candidate.label(), err));
                    if index + 1 < self.candidates.len() {
                        sleep(self.config.inter_attempt_delay).await;
                    }
                }
            }
        }

        let (last_candidate, source) = match last {
            Some(last) => last,
            None => return Err(MarksortError::NoCandidates),
        };
        Err(MarksortError::AllCandidatesFailed {
            attempted,
            last_candidate,
            source: Box::new(source),
        })
    }

    /// One candidate, splitting the batch while responses come back truncated
    fn categorize_with<'a>(
        &'a self,
        candidate: &'a ModelCandidate,
        batch: &'a [BookmarkRecord],
        categories: &'a [String],
        hints: &'a LearningHints,
    ) -> BoxFuture<'a, Result<Vec<CategorizedBookmark>>> {
        async move {
            let prompt = PromptTemplates::categorize(batch, categories, hints, self.parser.rules());
            let raw = self.request(candidate, prompt, Priority::Normal).await?;

            match self.parser.parse_categorizations(&raw, batch) {
                Err(err) if err.is_truncation() && batch.len() > 1 => {
                    let mid = batch.len().div_ceil(2);
                    debug!(
                        candidate = %candidate,
                        batch = batch.len(),
                        left = mid,
                        right = batch.len() - mid,
                        "Truncated response, splitting batch"
                    );
                    let mut items = self
                        .categorize_with(candidate, &batch[..mid], categories, hints)
                        .await?;
                    items.extend(
                        self.categorize_with(candidate, &batch[mid..], categories, hints)
                            .await?,
                    );
                    Ok(items)
                }
                other => other,
            }
        }
        .boxed()
    }

    async fn request(
        &self,
        candidate: &ModelCandidate,
        prompt: String,
        priority: Priority,
    ) -> Result<String> {
        let client = self
            .clients
            .get(&candidate.provider)
            .cloned()
            .ok_or_else(|| MarksortError::UnknownProvider(candidate.provider.to_string()))?;

        let request = Arc::new(
            CompletionRequest::new(candidate.model.clone(), prompt)
                .with_system(SYSTEM_PROMPT)
                .with_temperature(self.config.temperature)
                .with_max_output_tokens(self.config.max_output_tokens),
        );
        let thunk = request_thunk(move || {
            let client = Arc::clone(&client);
            let request = Arc::clone(&request);
            async move { client.complete(&request).await }
        });
        let options =
            EnqueueOptions::priority(priority).with_max_retries(self.config.retries_per_candidate);

        with_timeout(
            self.config.timeouts.candidate,
            self.queue.enqueue(thunk, candidate.provider, options),
            &candidate.label(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::{Capability, ModelClient, SizeClass};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Script = Box<dyn Fn(&CompletionRequest) -> Result<String> + Send + Sync>;

    struct ScriptedClient {
        provider: Provider,
        calls: Mutex<Vec<String>>,
        script: Script,
    }

    impl ScriptedClient {
        fn new(
            provider: Provider,
            script: impl Fn(&CompletionRequest) -> Result<String> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                provider,
                calls: Mutex::new(Vec::new()),
                script: Box::new(script),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.calls.lock().unwrap().push(request.model.clone());
            (self.script)(request)
        }

        fn provider(&self) -> Provider {
            self.provider
        }
    }

    fn status(provider: Provider, status: u16) -> MarksortError {
        MarksortError::Provider {
            provider,
            status,
            message: "scripted".to_string(),
        }
    }

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(vec![
            ModelCandidate::new(Provider::Gemini, "m-small", Capability::Size(SizeClass::Small)),
            ModelCandidate::new(Provider::Gemini, "m-ultra", Capability::Size(SizeClass::Ultra)),
            ModelCandidate::new(Provider::Gemini, "m-large", Capability::Size(SizeClass::Large)),
        ])
    }

    fn batch(n: usize) -> Vec<BookmarkRecord> {
        (1..=n)
            .map(|i| BookmarkRecord::new(format!("b{i}"), format!("Site {i}"), format!("https://{i}.example")))
            .collect()
    }

    /// Size of the batch a categorize prompt was built for
    fn prompt_batch_size(request: &CompletionRequest) -> usize {
        request
            .prompt
            .lines()
            .find_map(|l| l.strip_prefix("**Bookmarks**: "))
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or(0)
    }

    fn full_answer(n: usize) -> String {
        let items: Vec<String> = (1..=n)
            .map(|i| format!(r#"{{"id": {i}, "category": "Dev", "confidence": 0.8}}"#))
            .collect();
        format!("[{}]", items.join(","))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_candidates_fail() {
        let client = ScriptedClient::new(Provider::Gemini, |_| Err(status(Provider::Gemini, 503)));
        let orchestrator =
            ModelFallbackOrchestrator::new(RequestQueue::default(), [client.clone() as SharedModelClient], &catalog());
        let start = Instant::now();

        let err = orchestrator
            .categorize(&batch(2), &[], &LearningHints::default())
            .await
            .unwrap_err();

        assert_eq!(client.calls(), vec!["m-ultra", "m-large", "m-small"]);
        match &err {
            MarksortError::AllCandidatesFailed {
                attempted,
                last_candidate,
                ..
            } => {
                assert_eq!(*attempted, 3);
                assert_eq!(last_candidate, "gemini/m-small");
            }
            other => panic!("expected AllCandidatesFailed, got {other:?}"),
        }
        assert_eq!(err.status(), Some(503));
        // Two pauses between three candidates, no queue retries
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(orchestrator.queue().metrics().retried_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_aborts_cascade() {
        let client = ScriptedClient::new(Provider::Gemini, |_| Err(status(Provider::Gemini, 401)));
        let orchestrator =
            ModelFallbackOrchestrator::new(RequestQueue::default(), [client.clone() as SharedModelClient], &catalog());

        let err = orchestrator
            .categorize(&batch(2), &[], &LearningHints::default())
            .await
            .unwrap_err();

        assert!(err.is_request_invalid());
        assert_eq!(client.calls(), vec!["m-ultra"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_next_candidate() {
        let client = ScriptedClient::new(Provider::Gemini, |request| {
            if request.model == "m-ultra" {
                Err(status(Provider::Gemini, 503))
            } else {
                Ok(full_answer(prompt_batch_size(request)))
            }
        });
        let orchestrator =
            ModelFallbackOrchestrator::new(RequestQueue::default(), [client.clone() as SharedModelClient], &catalog());

        let items = orchestrator
            .categorize(&batch(3), &[], &LearningHints::default())
            .await
            .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(client.calls(), vec!["m-ultra", "m-large"]);
        let metrics = orchestrator.queue().metrics();
        assert_eq!(metrics.retried_requests, 0);
        assert_eq!(metrics.provider(Provider::Gemini).unwrap().requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncation_splits_batch_on_same_candidate() {
        let client = ScriptedClient::new(Provider::Gemini, |request| {
            let n = prompt_batch_size(request);
            if n == 4 {
                Ok(r#"[{"id": 1, "category": "Dev"}, {"id": 2, "cat"#.to_string())
            } else {
                Ok(full_answer(n))
            }
        });
        let orchestrator =
            ModelFallbackOrchestrator::new(RequestQueue::default(), [client.clone() as SharedModelClient], &catalog());

        let items = orchestrator
            .categorize(&batch(4), &[], &LearningHints::default())
            .await
            .unwrap();

        let ids: Vec<&str> = items.iter().map(|i| i.bookmark_id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2", "b3", "b4"]);
        assert_eq!(client.calls(), vec!["m-ultra"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_response_moves_on() {
        let client = ScriptedClient::new(Provider::Gemini, |request| {
            if request.model == "m-ultra" {
                Ok("I cannot help with that.".to_string())
            } else {
                Ok(full_answer(prompt_batch_size(request)))
            }
        });
        let orchestrator =
            ModelFallbackOrchestrator::new(RequestQueue::default(), [client.clone() as SharedModelClient], &catalog());

        let items = orchestrator
            .categorize(&batch(1), &[], &LearningHints::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let orchestrator = ModelFallbackOrchestrator::new(
            RequestQueue::default(),
            Vec::<SharedModelClient>::new(),
            &ModelCatalog::builtin(),
        );
        assert!(orchestrator.candidates().is_empty());
        let err = orchestrator
            .categorize(&batch(1), &[], &LearningHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MarksortError::NoCandidates));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_sampling_reaches_client() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let client = ScriptedClient::new(Provider::Gemini, move |request| {
            recorder
                .lock()
                .unwrap()
                .push((request.temperature, request.max_output_tokens));
            Ok(full_answer(prompt_batch_size(request)))
        });
        let orchestrator =
            ModelFallbackOrchestrator::new(RequestQueue::default(), [client as SharedModelClient], &catalog())
                .with_config(FallbackConfig {
                    temperature: 0.9,
                    max_output_tokens: 1024,
                    ..FallbackConfig::default()
                });

        orchestrator
            .categorize(&batch(2), &[], &LearningHints::default())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(0.9, 1024)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suggest_categories() {
        let client = ScriptedClient::new(Provider::Groq, |_| {
            Ok(r#"["Development", "Other", "News"]"#.to_string())
        });
        let orchestrator = ModelFallbackOrchestrator::new(
            RequestQueue::default(),
            [client as SharedModelClient],
            &ModelCatalog::builtin(),
        );

        assert_eq!(orchestrator.candidates()[0].model, "llama-3.3-70b-versatile");
        let names = orchestrator.suggest_categories(&batch(5), 10).await.unwrap();
        assert_eq!(names, vec!["Development", "News"]);
    }
}
