use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::chunker;

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default embedding model (multilingual, so non-English corpora rank sensibly)
const DEFAULT_MODEL: &str = "paraphrase-multilingual-minilm-l12-v2";
const DEFAULT_BATCH_SIZE: usize = 32;
/// Token limit passed to the tokenizer for each input
const DEFAULT_MAX_LENGTH: usize = 512;
const DEFAULT_EMBED_TIMEOUT_SECS: u64 = 120;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

const DEFAULT_CHUNK_SIZE: usize = 1000;
const DEFAULT_CHUNK_OVERLAP: usize = 200;
const DEFAULT_MAX_THREADS: u16 = 4;

const DEFAULT_MIN_SIMILARITY: f32 = 0.3;
const DEFAULT_LIMIT: usize = 10;
const DEFAULT_SIMILAR_LIMIT: usize = 5;
const DEFAULT_SNIPPET_LENGTH: usize = 200;
const DEFAULT_QUERY_CACHE_SIZE: usize = 10_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("{0}")]
    Invalid(String),
}

/// How a file is represented when it is used as a "similar files" anchor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPolicy {
    /// Vector of chunk 0
    #[default]
    FirstChunk,
    /// Component-wise mean of every chunk vector of the file
    Centroid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier (e.g. "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum number of texts per provider call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Placement hint: "auto", "cpu" or an accelerator name
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_length: DEFAULT_MAX_LENGTH,
            device: default_device(),
            embed_timeout_secs: DEFAULT_EMBED_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Window size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive windows, must be < chunk_size
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Extensions eligible for indexing, with or without the leading dot
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,

    /// encoding_rs labels tried in order; the first clean decode wins
    #[serde(default = "default_encodings")]
    pub encodings: Vec<String>,

    #[serde(default = "default_max_threads")]
    pub max_threads: u16,

    #[serde(default)]
    pub anchor_policy: AnchorPolicy,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            supported_extensions: default_supported_extensions(),
            encodings: default_encodings(),
            max_threads: DEFAULT_MAX_THREADS,
            anchor_policy: AnchorPolicy::default(),
        }
    }
}

impl IndexingConfig {
    /// Allowlist normalized to lower case without the leading dot.
    pub fn normalized_extensions(&self) -> Vec<String> {
        normalize_extensions(&self.supported_extensions)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Similarity floor applied when the caller gives none [-1.0, 1.0]
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,

    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,

    /// Number of cached query embeddings, 0 disables the cache
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
            default_limit: DEFAULT_LIMIT,
            similar_limit: DEFAULT_SIMILAR_LIMIT,
            snippet_length: DEFAULT_SNIPPET_LENGTH,
            query_cache_size: DEFAULT_QUERY_CACHE_SIZE,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

fn default_device() -> String {
    "auto".to_string()
}

fn default_embed_timeout_secs() -> u64 {
    DEFAULT_EMBED_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_supported_extensions() -> Vec<String> {
    ["txt", "md", "py", "js", "html", "css", "json", "xml"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_encodings() -> Vec<String> {
    ["utf-8", "gbk", "windows-1252"]
        .iter()
        .map(|label| label.to_string())
        .collect()
}

fn default_max_threads() -> u16 {
    DEFAULT_MAX_THREADS
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_similar_limit() -> usize {
    DEFAULT_SIMILAR_LIMIT
}

fn default_snippet_length() -> usize {
    DEFAULT_SNIPPET_LENGTH
}

fn default_query_cache_size() -> usize {
    DEFAULT_QUERY_CACHE_SIZE
}

/// Lower-case extensions without the leading dot, blanks removed.
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    /// Check every option once, before anything is indexed.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.indexing.max_threads == 0 {
            self.indexing.max_threads = 1
        }

        let idx = &self.indexing;
        chunker::validate_params(idx.chunk_size, idx.chunk_overlap).map_err(|e| {
            ConfigError::Invalid(format!(
                "indexing.chunk_size/chunk_overlap: {e} (chunk_size={}, chunk_overlap={})",
                idx.chunk_size, idx.chunk_overlap
            ))
        })?;

        if idx.normalized_extensions().is_empty() {
            return Err(ConfigError::Invalid(
                "indexing.supported_extensions must contain at least one extension".to_string(),
            ));
        }

        if idx.encodings.is_empty() {
            return Err(ConfigError::Invalid(
                "indexing.encodings must contain at least one encoding".to_string(),
            ));
        }
        for label in &idx.encodings {
            if encoding_rs::Encoding::for_label(label.trim().as_bytes()).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "indexing.encodings: unknown encoding label '{label}'"
                )));
            }
        }

        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding.model must not be empty".to_string()));
        }
        if emb.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }
        if emb.max_length == 0 {
            return Err(ConfigError::Invalid(
                "embedding.max_length must be greater than 0".to_string(),
            ));
        }
        if emb.embed_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.embed_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if emb.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.download_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let search = &self.search;
        if !(-1.0..=1.0).contains(&search.min_similarity) {
            return Err(ConfigError::Invalid(format!(
                "search.min_similarity must be between -1.0 and 1.0, got {}",
                search.min_similarity
            )));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing the defaults first if it
    /// does not exist yet.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE_NAME);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(base_path).map_err(io_err)?;

        // create new if does not exist
        if !path.exists() {
            let defaults = Self {
                base_path: base_path.to_path_buf(),
                ..Default::default()
            };
            defaults.save()?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE_NAME);
        let temp_path = path.with_extension("yaml.tmp");
        let config_str = serde_yml::to_string(&self)?;

        std::fs::write(&temp_path, config_str.as_bytes())
            .and_then(|_| std::fs::rename(&temp_path, &path))
            .map_err(|source| ConfigError::Io { path, source })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.indexing.chunk_size, 1000);
        assert_eq!(config.indexing.chunk_overlap, 200);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.indexing.anchor_policy, AnchorPolicy::FirstChunk);
    }

    #[test]
    fn test_default_encoding_chain_has_no_duplicates() {
        let config = Config::default();
        let chain = crate::semantic::decode::EncodingChain::from_labels(&config.indexing.encodings);
        assert_eq!(chain.names(), vec!["UTF-8", "GBK", "windows-1252"]);
    }

    #[test]
    fn test_overlap_not_smaller_than_chunk_size_is_rejected() {
        let mut config = Config::default();
        config.indexing.chunk_size = 100;
        config.indexing.chunk_overlap = 100;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.indexing.chunk_overlap = 150;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.indexing.chunk_overlap = 99;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        let mut config = Config::default();
        config.indexing.encodings = vec!["utf-8".to_string(), "klingon-1".to_string()];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_min_similarity_range() {
        let mut config = Config::default();
        config.search.min_similarity = 1.5;
        assert!(config.validate().is_err());

        config.search.min_similarity = -1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_is_clamped() {
        let mut config = Config::default();
        config.indexing.max_threads = 0;
        config.validate().unwrap();
        assert_eq!(config.indexing.max_threads, 1);
    }

    #[test]
    fn test_normalize_extensions() {
        let exts = vec![".MD".to_string(), " txt ".to_string(), ".".to_string()];
        assert_eq!(normalize_extensions(&exts), vec!["md", "txt"]);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(config.embedding.model, DEFAULT_MODEL);
        assert_eq!(config.base_path(), dir.path());
    }

    #[test]
    fn test_load_fills_missing_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "indexing:\n  chunk_size: 300\n  chunk_overlap: 50\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.indexing.chunk_size, 300);
        assert_eq!(config.indexing.chunk_overlap, 50);
        assert_eq!(config.search.snippet_length, DEFAULT_SNIPPET_LENGTH);

        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(saved.contains("snippet_length"));
    }

    #[test]
    fn test_load_rejects_invalid_chunking() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "indexing:\n  chunk_size: 100\n  chunk_overlap: 400\n",
        )
        .unwrap();

        let result = Config::load_with(dir.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
