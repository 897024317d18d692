//! Deterministic embedding providers and a scratch service for tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::{IndexReport, SemanticSearchService};

/// Bag-of-words vectors: every lower-cased word adds 1.0 to a hashed slot.
/// Texts sharing no words are (almost always) orthogonal.
pub struct HashingEmbedder {
    name: String,
    dims: usize,
    calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self::named("hashing-test", dims)
    }

    pub fn named(name: &str, dims: usize) -> Self {
        Self {
            name: name.to_string(),
            dims,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `encode` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let slot = fnv1a(&word.to_lowercase()) % self.dims as u64;
            vector[slot as usize] += 1.0;
        }
        vector
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x100000001b3)
    })
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Always fails.
pub struct FailingEmbedder {
    dims: usize,
}

impl FailingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-test"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::EmbeddingFailed("provider unavailable".to_string()))
    }
}

/// Hashing vectors after a fixed delay.
pub struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(dims: usize, delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::new(dims),
            delay,
        }
    }
}

impl Embedder for SlowEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        std::thread::sleep(self.delay);
        self.inner.encode(texts)
    }
}

/// A service over a scratch base directory with a hashing embedder
/// installed, plus an empty corpus directory to index.
pub struct TestEnv {
    pub service: SemanticSearchService,
    pub embedder: Arc<HashingEmbedder>,
    pub corpus: PathBuf,
    _tmp: tempfile::TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let base = tmp.path().join("base");
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir_all(&corpus).expect("failed to create corpus dir");

        let mut config = Config::load_with(&base).expect("failed to load config");
        configure(&mut config);

        let service = SemanticSearchService::open(config, &base).expect("failed to open service");
        let embedder = Arc::new(HashingEmbedder::new(64));
        service
            .initialize_with(embedder.clone())
            .expect("failed to install embedder");

        Self {
            service,
            embedder,
            corpus: std::fs::canonicalize(corpus).expect("failed to resolve corpus dir"),
            _tmp: tmp,
        }
    }

    /// Write `contents` to `corpus/<name>` and return its stored key.
    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> String {
        let path = self.corpus.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        std::fs::write(&path, contents).expect("failed to write corpus file");
        path.to_string_lossy().into_owned()
    }

    pub fn index(&self) -> IndexReport {
        self.service
            .index_directory(&self.corpus, true)
            .expect("indexing failed")
    }
}
