//! CLI Common Utilities
//!
//! Shared setup for commands that talk to models: configuration, the
//! settings store, provider clients, and the request pipeline built on them.

use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use tracing::debug;

use crate::ai::{
    ModelCatalog, ModelFallbackOrchestrator, RequestQueue, ResponseRepairParser, SharedModelClient,
    create_client,
};
use crate::config::{Config, ConfigLoader};
use crate::errors::{ErrorAggregator, ErrorNotifier, create_shared_aggregator};
use crate::organizer::{FileSettingsStore, RunSession, SettingsStore};
use crate::types::{Provider, Result};

/// Command execution context
///
/// Created via `CommandContext::load()`; holds the merged configuration and
/// the settings store named by it.
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub settings: Arc<FileSettingsStore>,
}

impl CommandContext {
    pub fn load() -> Result<Self> {
        let config = ConfigLoader::load()?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self> {
        let settings_path = ConfigLoader::settings_path(&config);
        debug!("Settings store: {}", settings_path.display());
        let settings = Arc::new(FileSettingsStore::open(settings_path)?);
        Ok(Self { config, settings })
    }

    /// API key for `provider`: config, then environment, then the settings store
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        self.config
            .api_key(provider)
            .map(|k| k.expose_secret().to_string())
            .or_else(|| self.settings.api_key(provider))
    }

    /// Providers with a usable API key, in declaration order
    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.api_key(*p).is_some())
            .collect()
    }

    /// One client per configured provider
    pub fn clients(&self) -> Result<Vec<SharedModelClient>> {
        self.configured_providers()
            .into_iter()
            .filter_map(|p| self.api_key(p).map(|key| (p, key)))
            .map(|(p, key)| create_client(&self.config.client_config(p, &key)))
            .collect()
    }

    pub fn queue(&self) -> RequestQueue {
        RequestQueue::new(
            self.config.rate_limits.to_limiter(),
            self.config.queue.to_queue_config(),
        )
    }

    pub fn orchestrator(&self) -> Result<ModelFallbackOrchestrator> {
        let clients = self.clients()?;
        let parser = ResponseRepairParser::new(self.config.organizer.category_rules());
        Ok(
            ModelFallbackOrchestrator::new(self.queue(), clients, &ModelCatalog::builtin())
                .with_parser(parser)
                .with_config(self.config.fallback.to_fallback_config(&self.config.llm)),
        )
    }

    pub fn aggregator(&self, notifier: Arc<dyn ErrorNotifier>) -> Arc<ErrorAggregator> {
        create_shared_aggregator(
            Duration::from_secs(self.config.errors.dedup_window_secs),
            notifier,
        )
    }

    pub fn session(&self) -> Arc<RunSession> {
        let organizer = &self.config.organizer;
        Arc::new(RunSession::new(
            Duration::from_secs(organizer.suppression_window_secs),
            Duration::from_secs(organizer.moved_item_ttl_secs),
        ))
    }
}
