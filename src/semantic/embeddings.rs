//! Embedding provider interface and the fastembed-backed implementation.
//!
//! - `Embedder`: batch encode contract every provider implements
//! - `FastEmbedder`: local ONNX models through fastembed, downloaded on first use
//! - `TimeoutEmbedder`: bounds each provider call with a deadline
//! - `encode_batched`: splits long inputs into provider-sized sub-batches

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};

use crate::config::EmbeddingConfig;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Embedding call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Provider returned malformed output: {0}")]
    Malformed(String),
}

/// Turns a batch of texts into fixed-dimension vectors.
///
/// `encode` returns exactly one vector per input, in input order, or fails as
/// a whole.
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Verify provider output has one vector per input, each of `dimensions`.
pub fn check_output(
    expected: usize,
    dimensions: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} dimensions, got {}",
            dimensions,
            bad.len()
        )));
    }
    Ok(())
}

/// Encode `texts` in sub-batches of at most `batch_size`.
///
/// Any failing sub-batch fails the whole call.
pub fn encode_batched(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut vectors = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let batch_vectors = embedder.encode(batch)?;
        check_output(batch.len(), embedder.dimensions(), &batch_vectors)?;
        vectors.extend(batch_vectors);
    }

    Ok(vectors)
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastEmbedder {
    /// Load the configured model, downloading it into `cache_dir/models` if it
    /// is not cached yet.
    pub fn new(config: &EmbeddingConfig, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(&config.model)?;

        match config.device.to_lowercase().as_str() {
            "auto" | "cpu" => {}
            other => log::warn!("Device '{}' requested, running embeddings on CPU", other),
        }

        // Ensure cache directory exists
        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_max_length(config.max_length)
            .with_show_download_progress(true);

        // Loading may download the model, so it runs on a worker we can abandon
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))
                .and_then(|mut model| {
                    let dimensions = Self::probe_dimensions(&mut model)?;
                    Ok((model, dimensions))
                });
            let _ = tx.send(result);
        });

        let timeout = Duration::from_secs(config.download_timeout_secs);
        let (model, dimensions) = match rx.recv_timeout(timeout) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(EmbeddingError::DownloadTimeout(config.download_timeout_secs))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(EmbeddingError::InitFailed(
                    "model loader exited unexpectedly".to_string(),
                ))
            }
        };

        log::info!(
            "Loaded embedding model '{}' ({} dimensions)",
            config.model,
            dimensions
        );

        Ok(Self {
            model: Mutex::new(model),
            model_name: config.model.clone(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        let lowered = name.to_lowercase();
        let short = lowered
            .trim_start_matches("sentence-transformers/")
            .trim_start_matches("baai/")
            .trim_start_matches("intfloat/");

        match short {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
            }
            "paraphrase-multilingual-minilm-l12-v2-q" | "paraphrasemlminilml12v2q" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2Q)
            }
            "multilingual-e5-small" | "multilinguale5small" => {
                Ok(fastembed::EmbeddingModel::MultilingualE5Small)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: paraphrase-multilingual-MiniLM-L12-v2, multilingual-e5-small, all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for FastEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// Runs every `encode` of the inner provider on a worker thread and gives up
/// after `timeout`.
///
/// A timed-out call keeps running in the background; its result is dropped.
pub struct TimeoutEmbedder {
    inner: Arc<dyn Embedder>,
    timeout: Duration,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Embedder for TimeoutEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || {
            let _ = tx.send(inner.encode(&texts));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Embedding call on '{}' exceeded {:?}",
                    self.inner.model_name(),
                    self.timeout
                );
                Err(EmbeddingError::Timeout(self.timeout.as_secs()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(EmbeddingError::EmbeddingFailed(
                "embedding worker exited without a result".to_string(),
            )),
        }
    }
}
