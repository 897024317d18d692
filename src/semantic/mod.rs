//! Semantic indexing and similarity search over files.
//!
//! Indexing: directory → content hash gate → decode → chunks → vectors → store.
//! Querying: query text → cached vector → scan and rank stored chunks.

pub mod cache;
pub mod chunker;
pub mod codec;
pub mod decode;
pub mod embeddings;
pub mod identity;
pub mod pipeline;
pub mod query;
pub mod rank;
pub mod service;
pub mod store;

pub use embeddings::{Embedder, EmbeddingError, FastEmbedder, TimeoutEmbedder};
pub use pipeline::{FileFailure, IndexReport, PipelineError};
pub use query::SearchResult;
pub use service::{IndexStats, SemanticSearchError, SemanticSearchService, ServiceStats};
pub use store::{VectorStore, VectorStoreError};
