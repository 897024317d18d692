//! Directory indexing: enumerate → fingerprint → decode → chunk → embed → store.
//!
//! Per-file failures are collected in the `IndexReport`; only problems that
//! affect the whole run (missing root, unusable store) abort it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::{normalize_extensions, EmbeddingConfig, IndexingConfig};
use crate::semantic::chunker::{self, ChunkError};
use crate::semantic::decode::{DecodeError, EncodingChain};
use crate::semantic::embeddings::{encode_batched, Embedder, EmbeddingError};
use crate::semantic::identity::{self, fingerprint_file, text_fingerprint};
use crate::semantic::store::{FileRecord, VectorStore, VectorStoreError};

/// Why a single file could not be indexed.
#[derive(Debug, thiserror::Error)]
pub enum FileIndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] VectorStoreError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

/// Failures that abort a whole indexing run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("directory not found: {0}")]
    RootNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("store error: {0}")]
    Store(#[from] VectorStoreError),

    #[error("failed to start indexing workers: {0}")]
    ThreadPool(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of one `index_directory` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    /// Stored files under the root that no longer exist on disk
    pub removed: usize,
    pub errors: Vec<FileFailure>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed { chunks: usize },
    /// Content hash matches the stored record
    Skipped,
}

/// Settings for an indexing run, resolved from configuration.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub extensions: Vec<String>,
    pub encodings: EncodingChain,
    pub max_threads: usize,
}

impl IndexOptions {
    pub fn from_config(indexing: &IndexingConfig, embedding: &EmbeddingConfig) -> Self {
        Self {
            chunk_size: indexing.chunk_size,
            chunk_overlap: indexing.chunk_overlap,
            batch_size: embedding.batch_size,
            extensions: indexing.normalized_extensions(),
            encodings: EncodingChain::from_labels(&indexing.encodings),
            max_threads: indexing.max_threads.max(1) as usize,
        }
    }

    /// Same options with a different extension allowlist.
    pub fn with_extensions(mut self, extensions: &[String]) -> Self {
        self.extensions = normalize_extensions(extensions);
        self
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Key under which a file is stored. Paths that are not valid UTF-8 cannot
/// be keyed: a lossy conversion would not name the file on disk.
pub fn path_key(path: &Path) -> Result<String, FileIndexError> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| FileIndexError::NonUtf8Path(path.to_path_buf()))
}

/// Printable form of a path for reports and logs.
fn display_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Result of walking the indexing root.
struct Walked {
    /// Eligible files, sorted
    files: Vec<PathBuf>,
    /// Keys of every regular file the walk saw, eligible or not
    seen: HashSet<String>,
}

fn file_type(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

pub struct Indexer<'a> {
    store: &'a VectorStore,
    embedder: &'a dyn Embedder,
    options: &'a IndexOptions,
    show_progress: bool,
}

impl<'a> Indexer<'a> {
    pub fn new(store: &'a VectorStore, embedder: &'a dyn Embedder, options: &'a IndexOptions) -> Self {
        Self {
            store,
            embedder,
            options,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while indexing.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Index every eligible file under `root`.
    pub fn index_directory(&self, root: &Path, recursive: bool) -> Result<IndexReport, PipelineError> {
        let started = Instant::now();
        let root = std::fs::canonicalize(root)
            .map_err(|_| PipelineError::RootNotFound(root.to_path_buf()))?;
        if !root.is_dir() {
            return Err(PipelineError::NotADirectory(root));
        }

        let _span = tracing::info_span!("index_directory", root = %root.display()).entered();

        let mut report = IndexReport::default();
        let Walked { files, seen } = self.collect_files(&root, recursive, &mut report);
        log::info!("Found {} files to index under {}", files.len(), root.display());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_threads)
            .build()
            .map_err(|e| PipelineError::ThreadPool(e.to_string()))?;

        let progress = self.progress_bar(files.len());
        let outcomes: Vec<(&PathBuf, Result<FileOutcome, FileIndexError>)> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let outcome = self.index_file(path);
                    if let Some(bar) = &progress {
                        bar.inc(1);
                    }
                    (path, outcome)
                })
                .collect()
        });
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        for (path, outcome) in outcomes {
            match outcome {
                Ok(FileOutcome::Indexed { chunks }) => {
                    log::debug!("Indexed {} ({} chunks)", path.display(), chunks);
                    report.indexed += 1;
                }
                Ok(FileOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    log::error!("Failed to index {}: {}", path.display(), e);
                    report.errors.push(FileFailure {
                        path: display_key(path),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.removed = self.prune_missing(&root, recursive, &seen)?;
        report.duration = started.elapsed();
        self.store
            .record_index_run(Utc::now().timestamp(), report.duration)?;

        log::info!(
            "Index complete: {} indexed, {} skipped, {} removed, {} errors in {:?}",
            report.indexed,
            report.skipped,
            report.removed,
            report.errors.len(),
            report.duration
        );

        Ok(report)
    }

    /// Index a single file. The content hash is checked before any decoding.
    pub fn index_file(&self, path: &Path) -> Result<FileOutcome, FileIndexError> {
        let key = path_key(path)?;

        let (content_hash, bytes) = fingerprint_file(path)?;
        if identity::unchanged(self.store, &key, &content_hash)? {
            return Ok(FileOutcome::Skipped);
        }

        let metadata = std::fs::metadata(path)?;
        let modified_at = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp())
            .unwrap_or(0);

        let (text, encoding) = self.options.encodings.decode(&bytes)?;
        log::debug!("Decoded {} as {}", key, encoding.name());

        let chunks = chunker::split(&text, self.options.chunk_size, self.options.chunk_overlap)?;
        let vectors = encode_batched(self.embedder, &chunks, self.options.batch_size)?;

        let record = FileRecord {
            path: key,
            content_hash,
            text_hash: text_fingerprint(&text),
            file_type: file_type(path),
            size_bytes: metadata.len(),
            modified_at,
            indexed_at: Utc::now().timestamp(),
        };

        let chunk_count = chunks.len();
        let pairs: Vec<(String, Vec<f32>)> = chunks.into_iter().zip(vectors).collect();
        self.store.upsert(&record, &pairs)?;

        Ok(FileOutcome::Indexed {
            chunks: chunk_count,
        })
    }

    /// Walk `root`. Unreadable entries and eligible files whose path cannot
    /// be keyed are reported and left out.
    fn collect_files(&self, root: &Path, recursive: bool, report: &mut IndexReport) -> Walked {
        let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        let mut seen = HashSet::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let eligible = self.options.accepts(entry.path());

                    match path_key(entry.path()) {
                        Ok(key) => {
                            seen.insert(key);
                            if eligible {
                                files.push(entry.into_path());
                            }
                        }
                        Err(e) if eligible => {
                            log::warn!("Skipping {}: {}", entry.path().display(), e);
                            report.errors.push(FileFailure {
                                path: display_key(entry.path()),
                                error: e.to_string(),
                            });
                        }
                        Err(_) => {}
                    }
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map(display_key)
                        .unwrap_or_else(|| display_key(root));
                    log::warn!("Cannot read {}: {}", path, e);
                    report.errors.push(FileFailure {
                        path,
                        error: FileIndexError::from(e).to_string(),
                    });
                }
            }
        }

        files.sort();
        Walked { files, seen }
    }

    /// Delete stored records under `root` that the walk did not see and that
    /// no longer exist on disk. Records inside directories the walk could not
    /// read are kept.
    fn prune_missing(
        &self,
        root: &Path,
        recursive: bool,
        seen: &HashSet<String>,
    ) -> Result<usize, VectorStoreError> {
        let mut removed = 0;

        for key in self.store.paths()? {
            if seen.contains(&key) {
                continue;
            }

            let path = Path::new(&key);
            let in_scope = if recursive {
                path.starts_with(root)
            } else {
                path.parent() == Some(root)
            };

            if in_scope && !path.is_file() && self.store.delete(&key)? {
                log::info!("Removed missing file {}", key);
                removed += 1;
            }
        }

        Ok(removed)
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }

        let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        Some(ProgressBar::new(len as u64).with_style(style))
    }
}
