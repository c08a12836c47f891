use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use notify::RecommendedWatcher;

use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::core::errors::IndexError;
use crate::embedding::EmbeddingProvider;
use crate::index::{IndexHandle, SqliteIndexStore};
use crate::llm::{GenerativeModel, OpenAiProvider};
use crate::search::SimilaritySearchEngine;
use crate::synthesis::{OrchestratorSettings, QualitySelector, SynthesisOrchestrator};

pub mod error;

use error::InitializationError;

/// Shared application state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: Arc<AppConfig>,
    pub index: IndexHandle,
    pub index_path: Option<PathBuf>,
    pub orchestrator: Arc<SynthesisOrchestrator>,
    pub started_at: DateTime<Utc>,
    index_watcher: Option<Arc<Mutex<RecommendedWatcher>>>,
}

impl AppState {
    /// Loads configuration, attaches the index and builds the provider
    /// clients.
    ///
    /// A missing index file is not fatal: the server starts with an unloaded
    /// index and picks the file up on reload (or through the watcher).
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config_service = ConfigService::new(paths.clone());
        let config = config_service
            .load_app_config()
            .map_err(InitializationError::Config)?;
        tracing::info!("Using config {}", config_service.config_path().display());

        let embedder = OpenAiProvider::new(
            &config.embedding.base_url,
            &config.embedding.model,
            config.embedding.api_key.clone(),
            config.embedding.timeout(),
        )
        .map_err(InitializationError::Embedding)?
        .with_dimensions(config.embedding.dimensions);

        let model = OpenAiProvider::new(
            &config.generation.base_url,
            &config.generation.model,
            config.generation.api_key.clone(),
            config.generation.timeout(),
        )
        .map_err(InitializationError::Generation)?;

        if config.generation.api_key.is_none() {
            tracing::warn!("No generation API key configured; requests go out unauthenticated");
        }

        let index_path = config_service.index_path(&config);
        let store = Arc::new(SqliteIndexStore::attach(&index_path));
        let index = IndexHandle::unloaded().with_store(store);

        match index.reload().await {
            Ok(snapshot) => {
                if let Some(built_with) = snapshot.embedding_model() {
                    if built_with != config.embedding.model {
                        tracing::warn!(
                            "Index was built with embedding model '{}' but '{}' is configured",
                            built_with,
                            config.embedding.model
                        );
                    }
                }
            }
            Err(IndexError::Missing(reason)) => {
                tracing::warn!(
                    "No index at {} ({}); build one with `build_index` and reload",
                    index_path.display(),
                    reason
                );
            }
            Err(err) => return Err(InitializationError::Index(err)),
        }

        let watcher = if config.index.watch {
            match index.watch(&index_path) {
                Ok(watcher) => {
                    tracing::info!("Watching {} for changes", index_path.display());
                    Some(Arc::new(Mutex::new(watcher)))
                }
                Err(err) => {
                    tracing::warn!("Failed to watch {}: {}", index_path.display(), err);
                    None
                }
            }
        } else {
            None
        };

        let mut state = Self::from_parts(
            paths,
            config,
            index,
            Arc::new(embedder),
            Arc::new(model),
        );
        state.index_path = Some(index_path);
        state.index_watcher = watcher;
        Ok(Arc::new(state))
    }

    /// Assembles state from already-built parts.
    pub fn from_parts(
        paths: Arc<AppPaths>,
        config: AppConfig,
        index: IndexHandle,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn GenerativeModel>,
    ) -> Self {
        let retry = config.retry.policy();
        let search = SimilaritySearchEngine::new(embedder, index.clone(), retry.clone());
        let orchestrator = SynthesisOrchestrator::new(search, model, retry)
            .with_selector(QualitySelector::new(config.synthesis.tier_preference.clone()))
            .with_settings(OrchestratorSettings {
                default_top_k: config.synthesis.default_top_k,
                channel_capacity: config.synthesis.channel_capacity,
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_tokens,
            });

        Self {
            paths,
            config: Arc::new(config),
            index,
            index_path: None,
            orchestrator: Arc::new(orchestrator),
            started_at: Utc::now(),
            index_watcher: None,
        }
    }

    pub fn is_watching_index(&self) -> bool {
        self.index_watcher.is_some()
    }
}
