//! Semantic search service over a directory index.
//!
//! Owns the configuration, the vector store, the embedding provider and the
//! query cache. Lifecycle is explicit:
//! - `open`/`with_store` build an uninitialized service (store only)
//! - `initialize` loads the embedding model; `shutdown` releases it
//! - `search` and `index_directory` need the model; `similar_files`, `stats`
//!   and `remove` work on the store alone
//!
//! Only indexing may clear the store when the loaded model differs from the
//! one the index was built with; `search` refuses to run against it instead.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::semantic::cache::QueryCache;
use crate::semantic::embeddings::{Embedder, EmbeddingError, FastEmbedder, TimeoutEmbedder};
use crate::semantic::pipeline::{path_key, IndexOptions, IndexReport, Indexer, PipelineError};
use crate::semantic::query::{self, QueryOptions, SearchResult};
use crate::semantic::store::{VectorStore, VectorStoreError};

pub const DATABASE_FILE_NAME: &str = "index.db";

/// Errors that can occur during semantic search operations.
#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Store error: {0}")]
    Store(#[from] VectorStoreError),

    #[error("Indexing error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Service not initialized")]
    NotInitialized,

    #[error("Index was built with '{indexed}' but '{loaded}' is loaded, rerun indexing")]
    ModelMismatch { indexed: String, loaded: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub last_index_at: Option<DateTime<Utc>>,
    pub last_index_duration: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub index: IndexStats,
    pub model_loaded: bool,
    pub model: String,
    pub dimensions: Option<usize>,
    pub database_path: Option<PathBuf>,
    pub cache_entries: usize,
    pub cache_capacity: usize,
}

pub struct SemanticSearchService {
    config: Config,
    store: VectorStore,
    embedder: RwLock<Option<Arc<dyn Embedder>>>,
    cache: QueryCache,
    show_progress: bool,
}

impl SemanticSearchService {
    /// Open (or create) `<base_path>/index.db`. The model is not loaded yet.
    pub fn open(config: Config, base_path: &Path) -> Result<Self, SemanticSearchError> {
        std::fs::create_dir_all(base_path).map_err(VectorStoreError::from)?;
        let store = VectorStore::open(&base_path.join(DATABASE_FILE_NAME))?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: VectorStore) -> Self {
        let cache = QueryCache::new(config.search.query_cache_size);
        Self {
            config,
            store,
            embedder: RwLock::new(None),
            cache,
            show_progress: false,
        }
    }

    /// Draw a progress bar while indexing.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Load the configured fastembed model. Downloads it on first use.
    pub fn initialize(&self) -> Result<(), SemanticSearchError> {
        if self.is_initialized() {
            return Ok(());
        }

        log::info!(
            "Initializing semantic search with model '{}'",
            self.config.embedding.model
        );

        let model = FastEmbedder::new(&self.config.embedding, self.config.base_path().to_path_buf())?;
        let timeout = Duration::from_secs(self.config.embedding.embed_timeout_secs);

        self.initialize_with(Arc::new(TimeoutEmbedder::new(Arc::new(model), timeout)))
    }

    /// Install an embedding provider. The store is left untouched; the next
    /// indexing run reconciles it with the provider's model.
    pub fn initialize_with(&self, embedder: Arc<dyn Embedder>) -> Result<(), SemanticSearchError> {
        let mut guard = self
            .embedder
            .write()
            .map_err(|e| SemanticSearchError::Internal(format!("Lock poisoned: {}", e)))?;
        *guard = Some(embedder);
        self.cache.clear();

        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.embedder
            .read()
            .ok()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Release the embedding model and forget cached query vectors.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.embedder.write() {
            if guard.take().is_some() {
                log::info!("Semantic search model unloaded");
            }
        }
        self.cache.clear();
    }

    fn embedder(&self) -> Result<Arc<dyn Embedder>, SemanticSearchError> {
        let guard = self
            .embedder
            .read()
            .map_err(|e| SemanticSearchError::Internal(format!("Lock poisoned: {}", e)))?;
        guard.clone().ok_or(SemanticSearchError::NotInitialized)
    }

    /// Index `root` with the configured extension allowlist.
    pub fn index_directory(
        &self,
        root: &Path,
        recursive: bool,
    ) -> Result<IndexReport, SemanticSearchError> {
        let options = IndexOptions::from_config(&self.config.indexing, &self.config.embedding);
        self.run_index(root, recursive, options)
    }

    /// Index `root`, accepting only `extensions` for this run.
    pub fn index_directory_with(
        &self,
        root: &Path,
        recursive: bool,
        extensions: &[String],
    ) -> Result<IndexReport, SemanticSearchError> {
        let options = IndexOptions::from_config(&self.config.indexing, &self.config.embedding)
            .with_extensions(extensions);
        self.run_index(root, recursive, options)
    }

    fn run_index(
        &self,
        root: &Path,
        recursive: bool,
        options: IndexOptions,
    ) -> Result<IndexReport, SemanticSearchError> {
        let embedder = self.embedder()?;

        let cleared = self
            .store
            .ensure_model(embedder.model_name(), embedder.dimensions())?;
        if cleared {
            log::warn!("Index cleared, reindexing with '{}'", embedder.model_name());
            self.cache.clear();
        }

        let indexer =
            Indexer::new(&self.store, embedder.as_ref(), &options).with_progress(self.show_progress);
        Ok(indexer.index_directory(root, recursive)?)
    }

    /// Chunks most similar to `query`.
    ///
    /// `limit` and `min_similarity` fall back to the configured defaults.
    /// Fails with `ModelMismatch` when the index was built with another model.
    pub fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SearchResult>, SemanticSearchError> {
        let embedder = self.embedder()?;
        self.check_model(embedder.as_ref())?;

        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let vector = match self.cache.get(query) {
            Some(vector) => vector,
            None => {
                let mut vectors = embedder.encode(&[query.to_string()])?;
                let vector = vectors.pop().ok_or_else(|| {
                    EmbeddingError::Malformed("no vector returned for query".to_string())
                })?;
                self.cache.put(query, vector.clone());
                vector
            }
        };

        let results = query::search_vector(
            &self.store,
            &vector,
            QueryOptions {
                limit: limit.unwrap_or(self.config.search.default_limit),
                min_similarity: Some(min_similarity.unwrap_or(self.config.search.min_similarity)),
                exclude_path: None,
                snippet_length: self.config.search.snippet_length,
            },
        )?;

        log::debug!("Search '{}' matched {} chunks", query, results.len());
        Ok(results)
    }

    fn check_model(&self, embedder: &dyn Embedder) -> Result<(), SemanticSearchError> {
        match self.store.active_model()? {
            Some((model, dims)) if model != embedder.model_name() || dims != embedder.dimensions() => {
                Err(SemanticSearchError::ModelMismatch {
                    indexed: format!("{model} ({dims} dims)"),
                    loaded: format!("{} ({} dims)", embedder.model_name(), embedder.dimensions()),
                })
            }
            _ => Ok(()),
        }
    }

    /// Chunks of other files similar to the indexed file at `path`.
    pub fn similar_files(
        &self,
        path: &Path,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>, SemanticSearchError> {
        let key = resolve_key(path);
        Ok(query::similar_files(
            &self.store,
            &key,
            limit.unwrap_or(self.config.search.similar_limit),
            self.config.indexing.anchor_policy,
            self.config.search.snippet_length,
        )?)
    }

    /// Drop a file from the index. Returns whether it was indexed.
    pub fn remove(&self, path: &Path) -> Result<bool, SemanticSearchError> {
        let key = resolve_key(path);
        let removed = self.store.delete(&key)?;
        if removed {
            log::info!("Removed {} from index", key);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<ServiceStats, SemanticSearchError> {
        let (total_files, total_chunks) = self.store.counts()?;
        let last_run = self.store.last_index_run()?;
        let active = self.store.active_model()?;

        let loaded = self.embedder.read().ok().and_then(|guard| guard.clone());
        let (model, dimensions) = match (&loaded, active) {
            (Some(embedder), _) => (embedder.model_name().to_string(), Some(embedder.dimensions())),
            (None, Some((model, dims))) => (model, Some(dims)),
            (None, None) => (self.config.embedding.model.clone(), None),
        };

        Ok(ServiceStats {
            index: IndexStats {
                total_files,
                total_chunks,
                last_index_at: last_run.and_then(|(at, _)| DateTime::from_timestamp(at, 0)),
                last_index_duration: last_run.map(|(_, duration)| duration),
            },
            model_loaded: loaded.is_some(),
            model,
            dimensions,
            database_path: self.store.path().map(Path::to_path_buf),
            cache_entries: self.cache.len(),
            cache_capacity: self.cache.capacity(),
        })
    }
}

/// Stored key for a user-supplied path. Falls back to the path as given when
/// it no longer exists on disk. A path that is not valid UTF-8 is never
/// stored, so its lossy form simply matches nothing.
fn resolve_key(path: &Path) -> String {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    path_key(&path).unwrap_or_else(|_| path.to_string_lossy().into_owned())
}
