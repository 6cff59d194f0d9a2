//! Categorize Command
//!
//! Sort a JSON bookmark tree into category folders.
//!
//! Usage:
//!   marksort categorize --bookmarks <file> [--categories a,b] [--suggest] [--dry-run]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::cli::ui::{ConsoleNotifier, Output};
use crate::cli::util::CommandContext;
use crate::errors::{ErrorNotifier, TracingNotifier};
use crate::organizer::{CategorizeReport, Categorizer, MemoryBookmarkStore, ProgressCallback};
use crate::types::{LearningHints, MarksortError, Result};

/// Options for `marksort categorize`
#[derive(Debug, Clone, Default)]
pub struct CategorizeOptions {
    pub bookmarks: PathBuf,
    pub categories: Vec<String>,
    pub suggest: bool,
    pub dry_run: bool,
    /// Write the organized tree here instead of back to `bookmarks`
    pub output: Option<PathBuf>,
    /// JSON file of `{ "hints": [{ "pattern", "category" }] }`
    pub hints: Option<PathBuf>,
}

pub async fn run(options: CategorizeOptions) -> Result<()> {
    let ctx = CommandContext::load()?;
    run_with_context(&ctx, options).await
}

pub async fn run_with_context(ctx: &CommandContext, options: CategorizeOptions) -> Result<()> {
    let out = Output::new();

    let orchestrator = Arc::new(ctx.orchestrator()?);
    if orchestrator.candidates().is_empty() {
        return Err(MarksortError::NoCandidates);
    }
    let maintenance = orchestrator.queue().spawn_maintenance();

    let aggregator = ctx.aggregator(error_notifier(console::user_attended_stderr()));
    let sweeper =
        aggregator.spawn_sweeper(Duration::from_secs(ctx.config.errors.sweep_interval_secs));

    let store = Arc::new(MemoryBookmarkStore::load(&options.bookmarks)?);
    let progress: ProgressCallback = Arc::new(|index: usize, total: usize| -> anyhow::Result<()> {
        println!(
            "{} Batch {}/{}",
            console::style("→").cyan(),
            index + 1,
            total
        );
        Ok(())
    });

    let categorizer = Categorizer::new(
        orchestrator.clone(),
        store.clone(),
        ctx.settings.clone(),
        aggregator.clone(),
    )
    .with_progress(progress)
    .with_session(ctx.session())
    .with_root_folder(ctx.config.organizer.root_folder.clone())
    .with_default_batch_size(ctx.config.organizer.batch_size)
    .with_timeouts(ctx.config.fallback.to_fallback_config(&ctx.config.llm).timeouts);

    let result = organize(ctx, &out, &categorizer, &store, &options).await;

    maintenance.abort();
    sweeper.abort();

    out.section("Queue");
    println!("{}", orchestrator.queue().metrics().display());

    result
}

async fn organize(
    ctx: &CommandContext,
    out: &Output,
    categorizer: &Categorizer,
    store: &MemoryBookmarkStore,
    options: &CategorizeOptions,
) -> Result<()> {
    let bookmarks = categorizer.load_bookmarks().await?;
    if bookmarks.is_empty() {
        out.warning("No bookmarks found");
        return Ok(());
    }
    out.info(&format!(
        "Loaded {} bookmarks from {}",
        bookmarks.len(),
        options.bookmarks.display()
    ));

    let mut categories = options.categories.clone();
    if options.suggest {
        let suggested = categorizer
            .suggest_categories(&bookmarks, ctx.config.fallback.max_suggested_categories)
            .await?;
        out.info(&format!("Suggested categories: {}", suggested.join(", ")));
        for name in suggested {
            if !categories.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
                categories.push(name);
            }
        }
    }

    let hints = match &options.hints {
        Some(path) => load_hints(path)?,
        None => LearningHints::default(),
    };

    let report = categorizer.categorize(&bookmarks, &categories, &hints).await;
    print_report(out, &report);

    if report.assignments.is_empty() {
        return Err(MarksortError::Validation(
            "No bookmarks were categorized".to_string(),
        ));
    }

    if options.dry_run {
        out.info("Dry run: bookmark tree left unchanged");
        return Ok(());
    }

    let moved = categorizer.apply(&report.assignments).await?;
    let target = options.output.as_deref().unwrap_or(&options.bookmarks);
    store.save(target)?;
    info!(moved, path = %target.display(), "Organized tree written");
    out.success(&format!("Moved {} bookmarks, saved {}", moved, target.display()));
    Ok(())
}

/// Styled stderr output on a terminal, log events when stderr is redirected
fn error_notifier(attended: bool) -> Arc<dyn ErrorNotifier> {
    if attended {
        Arc::new(ConsoleNotifier::new())
    } else {
        Arc::new(TracingNotifier)
    }
}

fn load_hints(path: &Path) -> Result<LearningHints> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn print_report(out: &Output, report: &CategorizeReport) {
    out.section("Categories");
    for category in report.categories() {
        let count = report
            .assignments
            .iter()
            .filter(|a| a.category == category)
            .count();
        out.field(&category, count);
    }

    if report.failed_batches > 0 {
        out.warning(&format!(
            "{} of {} batches failed; {} bookmarks left in place",
            report.failed_batches, report.total_batches, report.skipped
        ));
    } else {
        out.success(&format!(
            "Categorized {} bookmarks in {} batches",
            report.assignments.len(),
            report.total_batches
        ));
    }
}
