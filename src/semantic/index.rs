//! Cosine similarity search over a snapshot of candidate vectors.
//!
//! Search is a pure linear scan: it never mutates shared state, so large
//! candidate sets are scored in parallel with rayon.
//!
//! Ranking contract:
//! - candidates whose length differs from the query are skipped and logged
//! - only scores strictly above the threshold are kept
//! - results sort by descending score, ties by ascending id
//! - `limit` applies after filtering and sorting

use std::cmp::Ordering;

use rayon::prelude::*;

use super::normalize::l2_norm;

/// Candidate sets at least this large are scored on the rayon pool.
const PARALLEL_MIN_CANDIDATES: usize = 2048;

/// One vector to rank against the query.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: &'a str,
    pub vector: &'a [f32],
}

/// Search result with its cosine similarity in [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
}

/// Errors that make the whole query meaningless.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Cannot search with an empty query vector")]
    EmptyQuery,

    #[error("Cannot search with zero-norm query vector")]
    ZeroNormVector,
}

/// Rank `candidates` by cosine similarity to `query`.
pub fn search(
    query: &[f32],
    candidates: &[Candidate<'_>],
    limit: usize,
    threshold: f32,
) -> Result<Vec<SearchResult>, IndexError> {
    if query.is_empty() {
        return Err(IndexError::EmptyQuery);
    }

    let query_norm = l2_norm(query);
    if query_norm < f32::EPSILON || !query_norm.is_finite() {
        return Err(IndexError::ZeroNormVector);
    }

    let score = |candidate: &Candidate<'_>| -> Option<SearchResult> {
        if candidate.vector.len() != query.len() {
            log::warn!(
                "skipping candidate {}: dimension mismatch, expected {}, got {}",
                candidate.id,
                query.len(),
                candidate.vector.len()
            );
            return None;
        }

        let score = cosine_similarity(query, candidate.vector, query_norm)?;
        (score > threshold).then(|| SearchResult {
            id: candidate.id.to_string(),
            score,
        })
    };

    let mut results: Vec<SearchResult> = if candidates.len() >= PARALLEL_MIN_CANDIDATES {
        candidates.par_iter().filter_map(score).collect()
    } else {
        candidates.iter().filter_map(score).collect()
    };

    results.sort_by(rank_order);
    results.truncate(limit);

    Ok(results)
}

/// Full cosine formula; inputs are not assumed to be normalized.
/// Returns `None` when the target has zero norm.
pub fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> Option<f32> {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON || !target_norm.is_finite() {
        return None;
    }

    let dot_product: f32 = query.iter().zip(target).map(|(a, b)| a * b).sum();
    let score = (dot_product / (query_norm * target_norm)).clamp(-1.0, 1.0);
    score.is_finite().then_some(score)
}

fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}
