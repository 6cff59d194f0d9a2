//! Batch Categorizer
//!
//! Drives one organizer run:
//! 1. Split bookmarks into batches (`batchSize` from the settings store)
//! 2. Report progress before each batch
//! 3. Categorize each batch through the model cascade
//! 4. Move bookmarks into `<root>/<category path>` folders
//!
//! A batch that fails terminally is classified and reported through the
//! error aggregator; the run continues with the next batch. Repeats of the
//! same failure reach the user once per aggregation window.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::ai::fallback::ModelFallbackOrchestrator;
use crate::ai::timeout::{TimeoutConfig, with_timeout};
use crate::constants::organizer as consts;
use crate::errors::{ErrorAggregator, ErrorClassifier, OPERATION_KEY, error_context};
use crate::types::{BookmarkRecord, CategorizedBookmark, LearningHints, Result};

use super::session::RunSession;
use super::store::{SharedBookmarkStore, SharedSettingsStore};

/// Called with `(batch_index, total_batches)` before each batch
pub type ProgressCallback = Arc<dyn Fn(usize, usize) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of [`Categorizer::categorize`]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizeReport {
    pub assignments: Vec<CategorizedBookmark>,
    pub total_batches: usize,
    pub failed_batches: usize,
    /// Bookmarks in failed batches
    pub skipped: usize,
}

impl CategorizeReport {
    /// Distinct category paths in first-seen order
    pub fn categories(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.assignments
            .iter()
            .filter(|a| seen.insert(a.category.clone()))
            .map(|a| a.category.clone())
            .collect()
    }
}

pub struct Categorizer {
    orchestrator: Arc<ModelFallbackOrchestrator>,
    bookmarks: SharedBookmarkStore,
    settings: SharedSettingsStore,
    aggregator: Arc<ErrorAggregator>,
    session: Arc<RunSession>,
    progress: Option<ProgressCallback>,
    root_folder: String,
    default_batch_size: usize,
    timeouts: TimeoutConfig,
}

impl Categorizer {
    pub fn new(
        orchestrator: Arc<ModelFallbackOrchestrator>,
        bookmarks: SharedBookmarkStore,
        settings: SharedSettingsStore,
        aggregator: Arc<ErrorAggregator>,
    ) -> Self {
        Self {
            orchestrator,
            bookmarks,
            settings,
            aggregator,
            session: Arc::new(RunSession::default()),
            progress: None,
            root_folder: consts::ROOT_FOLDER.to_string(),
            default_batch_size: consts::DEFAULT_BATCH_SIZE,
            timeouts: TimeoutConfig::default(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_session(mut self, session: Arc<RunSession>) -> Self {
        self.session = session;
        self
    }

    pub fn with_root_folder(mut self, name: impl Into<String>) -> Self {
        self.root_folder = name.into();
        self
    }

    /// Batch size used when the settings store has none
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size.max(1);
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn session(&self) -> &Arc<RunSession> {
        &self.session
    }

    /// All bookmarks currently in the store
    pub async fn load_bookmarks(&self) -> Result<Vec<BookmarkRecord>> {
        let tree = with_timeout(
            self.timeouts.store,
            self.bookmarks.list_all(),
            "listing bookmarks",
        )
        .await?;
        Ok(tree.bookmarks())
    }

    /// Ask the cascade for folder names fitting a sample of `bookmarks`
    pub async fn suggest_categories(
        &self,
        bookmarks: &[BookmarkRecord],
        max: usize,
    ) -> Result<Vec<String>> {
        let limit = self.settings.batch_size_or(self.default_batch_size);
        let sample = &bookmarks[..bookmarks.len().min(limit)];
        match self.orchestrator.suggest_categories(sample, max).await {
            Ok(names) => Ok(names),
            Err(err) => {
                self.aggregator.report(
                    "suggest",
                    &err,
                    error_context([(OPERATION_KEY, json!("suggesting categories"))]),
                );
                Err(err)
            }
        }
    }

    /// Categorize `bookmarks` batch by batch. Failed batches are reported and skipped.
    pub async fn categorize(
        &self,
        bookmarks: &[BookmarkRecord],
        categories: &[String],
        hints: &LearningHints,
    ) -> CategorizeReport {
        self.aggregator.clear();

        let batch_size = self.settings.batch_size_or(self.default_batch_size);
        let batches: Vec<&[BookmarkRecord]> = bookmarks.chunks(batch_size).collect();
        let mut report = CategorizeReport {
            total_batches: batches.len(),
            ..CategorizeReport::default()
        };

        info!(
            bookmarks = bookmarks.len(),
            batches = batches.len(),
            batch_size,
            "Categorizing bookmarks"
        );

        for (index, batch) in batches.iter().enumerate() {
            if let Some(progress) = &self.progress
                && let Err(e) = progress(index, batches.len())
            {
                warn!("Progress callback failed: {:#}", e);
            }

            match self.orchestrator.categorize(batch, categories, hints).await {
                Ok(items) => {
                    debug!(batch = index, items = items.len(), "Batch categorized");
                    report.assignments.extend(items);
                }
                Err(err) => {
                    report.failed_batches += 1;
                    report.skipped += batch.len();
                    let kind = ErrorClassifier::classify(&err);
                    let context = error_context([
                        (OPERATION_KEY, json!("categorizing bookmarks")),
                        ("batch", json!(index)),
                        ("batchSize", json!(batch.len())),
                    ]);
                    self.aggregator
                        .report(&format!("categorize:{}", kind), &err, context);
                }
            }
        }

        report
    }

    /// Move every assignment under the root folder. Returns the number moved.
    ///
    /// Moves happen inside a run session so move observers ignore them.
    pub async fn apply(&self, assignments: &[CategorizedBookmark]) -> Result<usize> {
        self.session.begin();
        let result = self.move_all(assignments).await;
        self.session.end();
        result
    }

    async fn move_all(&self, assignments: &[CategorizedBookmark]) -> Result<usize> {
        let tree = with_timeout(
            self.timeouts.store,
            self.bookmarks.list_all(),
            "listing bookmarks",
        )
        .await?;
        let root = self.ensure_folder(&tree.id, &self.root_folder).await?;

        let mut folders: HashMap<String, String> = HashMap::new();
        let mut moved = 0;

        for assignment in assignments {
            let folder_id = match folders.get(&assignment.category) {
                Some(id) => id.clone(),
                None => {
                    let mut parent = root.clone();
                    for segment in assignment.category.split('/').filter(|s| !s.is_empty()) {
                        parent = self.ensure_folder(&parent, segment).await?;
                    }
                    folders.insert(assignment.category.clone(), parent.clone());
                    parent
                }
            };

            with_timeout(
                self.timeouts.store,
                self.bookmarks.move_to(&assignment.bookmark_id, &folder_id),
                "moving bookmark",
            )
            .await?;
            self.session.mark_moved(&assignment.bookmark_id);
            moved += 1;
        }

        info!(moved, folders = folders.len(), "Bookmarks organized");
        Ok(moved)
    }

    /// Id of the folder `title` under `parent_id`, created if missing
    async fn ensure_folder(&self, parent_id: &str, title: &str) -> Result<String> {
        let children = with_timeout(
            self.timeouts.store,
            self.bookmarks.children(parent_id),
            "listing folder",
        )
        .await?;
        if let Some(existing) = children
            .iter()
            .find(|c| c.is_folder() && c.title.eq_ignore_ascii_case(title))
        {
            return Ok(existing.id.clone());
        }

        let folder = with_timeout(
            self.timeouts.store,
            self.bookmarks.create(parent_id, title),
            "creating folder",
        )
        .await?;
        debug!(folder = %title, id = %folder.id, "Created folder");
        Ok(folder.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::{CompletionRequest, ModelCatalog, ModelClient, SharedModelClient};
    use crate::ai::queue::RequestQueue;
    use crate::errors::{ContextError, ErrorNotifier};
    use crate::organizer::store::{
        BATCH_SIZE_KEY, BookmarkStore, MemoryBookmarkStore, MemorySettingsStore, SettingsStore,
    };
    use crate::types::{BookmarkNode, MarksortError, Provider};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers "Dev/Rust" for every numbered bookmark in the prompt
    struct EchoClient;

    #[async_trait]
    impl ModelClient for EchoClient {
        async fn complete(&self, request: &CompletionRequest) -> crate::types::Result<String> {
            let n: usize = request
                .prompt
                .lines()
                .find_map(|l| l.strip_prefix("**Bookmarks**: "))
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(0);
            let items: Vec<String> = (1..=n)
                .map(|i| format!(r#"{{"id": {i}, "category": "Dev/Rust"}}"#))
                .collect();
            Ok(format!("[{}]", items.join(",")))
        }

        fn provider(&self) -> Provider {
            Provider::Groq
        }
    }

    struct DeniedClient;

    #[async_trait]
    impl ModelClient for DeniedClient {
        async fn complete(&self, _: &CompletionRequest) -> crate::types::Result<String> {
            Err(MarksortError::Provider {
                provider: Provider::Groq,
                status: 401,
                message: "Invalid API key".to_string(),
            })
        }

        fn provider(&self) -> Provider {
            Provider::Groq
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        seen: Mutex<Vec<String>>,
    }

    impl ErrorNotifier for CountingNotifier {
        fn notify(&self, error: &ContextError) {
            self.seen.lock().unwrap().push(error.user_message.clone());
        }
    }

    fn store_with(n: usize) -> Arc<MemoryBookmarkStore> {
        let children = (1..=n)
            .map(|i| BookmarkNode {
                id: format!("b{i}"),
                parent_id: Some("root".into()),
                title: format!("Site {i}"),
                url: Some(format!("https://{i}.example")),
                children: vec![],
            })
            .collect();
        Arc::new(MemoryBookmarkStore::from_tree(BookmarkNode {
            id: "root".into(),
            parent_id: None,
            title: String::new(),
            url: None,
            children,
        }))
    }

    fn categorizer(
        client: SharedModelClient,
        store: Arc<MemoryBookmarkStore>,
        notifier: Arc<CountingNotifier>,
    ) -> Categorizer {
        let orchestrator = ModelFallbackOrchestrator::new(
            RequestQueue::default(),
            [client],
            &ModelCatalog::builtin(),
        );
        let settings = Arc::new(MemorySettingsStore::new());
        settings.set(BATCH_SIZE_KEY, json!(3)).unwrap();
        Categorizer::new(
            Arc::new(orchestrator),
            store,
            settings,
            Arc::new(ErrorAggregator::with_notifier(
                std::time::Duration::from_secs(60),
                notifier,
            )),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_progress_and_moves() {
        let store = store_with(7);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let categorizer = categorizer(Arc::new(EchoClient), store.clone(), Arc::default())
            .with_progress(Arc::new(move |index: usize, total: usize| -> anyhow::Result<()> {
                assert_eq!(total, 3);
                counter.fetch_add(1, Ordering::SeqCst);
                if index == 1 {
                    anyhow::bail!("progress sink closed");
                }
                Ok(())
            }));

        let bookmarks = categorizer.load_bookmarks().await.unwrap();
        let report = categorizer
            .categorize(&bookmarks, &[], &LearningHints::default())
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.total_batches, 3);
        assert_eq!(report.assignments.len(), 7);
        assert_eq!(report.categories(), vec!["Dev/Rust"]);

        let moved = categorizer.apply(&report.assignments).await.unwrap();
        assert_eq!(moved, 7);
        assert!(categorizer.session().should_ignore_move("b3"));

        let root_children = store.children("root").await.unwrap();
        assert_eq!(root_children.len(), 1);
        assert_eq!(root_children[0].title, "Organized");
        let dev = store.children(&root_children[0].id).await.unwrap();
        assert_eq!(dev[0].title, "Dev");
        let rust = store.children(&dev[0].id).await.unwrap();
        assert_eq!(rust[0].title, "Rust");
        assert_eq!(store.children(&rust[0].id).await.unwrap().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_failure_notified_once() {
        let notifier = Arc::new(CountingNotifier::default());
        let categorizer = categorizer(Arc::new(DeniedClient), store_with(7), notifier.clone());

        let bookmarks = categorizer.load_bookmarks().await.unwrap();
        let report = categorizer
            .categorize(&bookmarks, &[], &LearningHints::default())
            .await;

        assert!(report.assignments.is_empty());
        assert_eq!(report.failed_batches, 3);
        assert_eq!(report.skipped, 7);

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("while categorizing bookmarks"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_root_folder_reused() {
        let store = store_with(2);
        store.create("root", "organized").await.unwrap();
        let categorizer = categorizer(Arc::new(EchoClient), store.clone(), Arc::default());

        let bookmarks = categorizer.load_bookmarks().await.unwrap();
        let report = categorizer
            .categorize(&bookmarks, &[], &LearningHints::default())
            .await;
        categorizer.apply(&report.assignments).await.unwrap();

        let folders: Vec<String> = store
            .children("root")
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.is_folder())
            .map(|c| c.title)
            .collect();
        assert_eq!(folders, vec!["organized"]);
    }
}
