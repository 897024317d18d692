//! Cosine similarity and bounded top-k selection.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity against a query whose norm is precomputed.
///
/// Returns `None` when the similarity is undefined: mismatched dimensions or a
/// zero-norm vector on either side.
pub fn cosine_similarity(query: &[f32], query_norm: f32, target: &[f32]) -> Option<f32> {
    if query.len() != target.len() || query_norm == 0.0 {
        return None;
    }

    let target_norm = l2_norm(target);
    if target_norm == 0.0 {
        return None;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let score = dot_product / (query_norm * target_norm);
    score.is_finite().then_some(score)
}

/// A scored entry. Ordering puts the better-ranked entry first: higher score,
/// then smaller path, then smaller chunk index.
#[derive(Debug, Clone)]
pub struct Ranked<T> {
    pub score: f32,
    pub path: String,
    pub chunk_index: usize,
    pub item: T,
}

impl<T> Ranked<T> {
    /// `Ordering::Greater` when `self` ranks above `other`.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.path.cmp(&self.path))
            .then_with(|| other.chunk_index.cmp(&self.chunk_index))
    }
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.rank_cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank_cmp(other)
    }
}

/// Keeps the best `limit` entries seen so far.
pub struct TopK<T> {
    limit: usize,
    // min-heap: the worst retained entry sits on top
    heap: BinaryHeap<Reverse<Ranked<T>>>,
}

impl<T> TopK<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(1024)),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, entry: Ranked<T>) {
        if self.limit == 0 {
            return;
        }

        if self.heap.len() < self.limit {
            self.heap.push(Reverse(entry));
            return;
        }

        let replaces_worst = self
            .heap
            .peek()
            .map(|Reverse(worst)| entry > *worst)
            .unwrap_or(false);
        if replaces_worst {
            self.heap.pop();
            self.heap.push(Reverse(entry));
        }
    }

    /// Best entry first.
    pub fn into_sorted_vec(self) -> Vec<Ranked<T>> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(entry)| entry)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(score: f32, path: &str, chunk_index: usize) -> Ranked<()> {
        Ranked {
            score,
            path: path.to_string(),
            chunk_index,
            item: (),
        }
    }

    #[test]
    fn test_cosine_basic() {
        let q = [1.0, 0.0, 0.0];
        let n = l2_norm(&q);
        assert!((cosine_similarity(&q, n, &[2.0, 0.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&q, n, &[0.0, 3.0, 0.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&q, n, &[-1.0, 0.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_cases_excluded() {
        let q = [1.0, 0.0, 0.0];
        let n = l2_norm(&q);
        assert_eq!(cosine_similarity(&q, n, &[0.0, 0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&q, n, &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], 0.0, &[1.0, 0.0, 0.0]), None);
    }

    #[test]
    fn test_cosine_small_magnitudes_are_scored() {
        let q = [1e-8, 0.0, 0.0];
        let n = l2_norm(&q);
        let score = cosine_similarity(&q, n, &[2e-8, 0.0, 0.0]).unwrap();
        assert!((score - 1.0).abs() < 1e-5);

        let score = cosine_similarity(&[1.0, 0.0], 1.0, &[-3e-9, 0.0]).unwrap();
        assert!((score + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_non_finite_excluded() {
        let q = [f32::NAN, 1.0];
        assert_eq!(cosine_similarity(&q, l2_norm(&q), &[1.0, 1.0]), None);
    }

    #[test]
    fn test_topk_keeps_best() {
        let mut top = TopK::new(3);
        for (i, score) in [0.1, 0.9, 0.5, 0.7, 0.3, 0.8].iter().enumerate() {
            top.push(ranked(*score, &format!("/f{i}"), 0));
        }

        let scores: Vec<f32> = top.into_sorted_vec().iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7]);
    }

    #[test]
    fn test_topk_ties_broken_by_path_then_chunk() {
        let mut top = TopK::new(10);
        top.push(ranked(0.5, "/b", 0));
        top.push(ranked(0.5, "/a", 2));
        top.push(ranked(0.5, "/a", 1));
        top.push(ranked(0.6, "/z", 0));

        let order: Vec<(String, usize)> = top
            .into_sorted_vec()
            .into_iter()
            .map(|r| (r.path, r.chunk_index))
            .collect();
        assert_eq!(
            order,
            vec![
                ("/z".to_string(), 0),
                ("/a".to_string(), 1),
                ("/a".to_string(), 2),
                ("/b".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_topk_tie_at_capacity_is_deterministic() {
        let mut forward = TopK::new(1);
        forward.push(ranked(0.5, "/a", 0));
        forward.push(ranked(0.5, "/b", 0));

        let mut backward = TopK::new(1);
        backward.push(ranked(0.5, "/b", 0));
        backward.push(ranked(0.5, "/a", 0));

        assert_eq!(forward.into_sorted_vec()[0].path, "/a");
        assert_eq!(backward.into_sorted_vec()[0].path, "/a");
    }

    #[test]
    fn test_topk_zero_limit() {
        let mut top = TopK::new(0);
        top.push(ranked(1.0, "/a", 0));
        assert!(top.is_empty());
        assert!(top.into_sorted_vec().is_empty());
    }
}
