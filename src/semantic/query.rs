//! Brute-force similarity search over every stored chunk.

use serde::Serialize;

use crate::config::AnchorPolicy;
use crate::semantic::rank::{cosine_similarity, l2_norm, Ranked, TopK};
use crate::semantic::store::{FileMeta, VectorStore, VectorStoreError};

/// One matching chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub score: f32,
    pub snippet: String,
    pub file_type: String,
    pub modified_at: i64,
    pub size_bytes: u64,
    pub chunk_index: usize,
}

/// First `max_chars` characters of `text`, with `...` when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions<'a> {
    pub limit: usize,
    /// Chunks scoring below this are dropped; `None` keeps everything
    pub min_similarity: Option<f32>,
    /// Chunks of this file are never returned
    pub exclude_path: Option<&'a str>,
    pub snippet_length: usize,
}

/// Rank stored chunks against `query`. Best first, ties by path then chunk.
pub fn search_vector(
    store: &VectorStore,
    query: &[f32],
    options: QueryOptions<'_>,
) -> Result<Vec<SearchResult>, VectorStoreError> {
    let query_norm = l2_norm(query);
    if options.limit == 0 || query_norm == 0.0 {
        return Ok(Vec::new());
    }

    let mut top: TopK<(String, FileMeta)> = TopK::new(options.limit);
    store.scan_all(|chunk| {
        if options.exclude_path == Some(chunk.path.as_str()) {
            return;
        }

        let Some(score) = cosine_similarity(query, query_norm, &chunk.vector) else {
            return;
        };
        if options.min_similarity.is_some_and(|floor| score < floor) {
            return;
        }

        top.push(Ranked {
            score,
            path: chunk.path,
            chunk_index: chunk.chunk_index,
            item: (chunk.text, chunk.meta),
        });
    })?;

    Ok(top
        .into_sorted_vec()
        .into_iter()
        .map(|ranked| {
            let (text, meta) = ranked.item;
            SearchResult {
                path: ranked.path,
                score: ranked.score,
                snippet: snippet(&text, options.snippet_length),
                file_type: meta.file_type,
                modified_at: meta.modified_at,
                size_bytes: meta.size_bytes,
                chunk_index: ranked.chunk_index,
            }
        })
        .collect())
}

/// Chunks of other files closest to `path`'s anchor vector.
///
/// Empty when `path` is not indexed or has no chunks.
pub fn similar_files(
    store: &VectorStore,
    path: &str,
    limit: usize,
    policy: AnchorPolicy,
    snippet_length: usize,
) -> Result<Vec<SearchResult>, VectorStoreError> {
    let Some(anchor) = store.get_vector(path, policy)? else {
        log::debug!("No anchor vector for {}", path);
        return Ok(Vec::new());
    };

    search_vector(
        store,
        &anchor,
        QueryOptions {
            limit,
            min_similarity: None,
            exclude_path: Some(path),
            snippet_length,
        },
    )
}
