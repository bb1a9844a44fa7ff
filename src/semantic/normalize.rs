//! Text normalization and vector post-processing for embedding.
//!
//! Card content is normalized before hashing and before it reaches the
//! model, so trivially different formatting maps to one cache entry and one
//! model input:
//! 1. Trim surrounding whitespace
//! 2. Case-fold
//! 3. Collapse internal whitespace runs to a single space
//! 4. Truncate to the model input budget

use sha2::{Digest, Sha256};

/// Maximum content length for embedding input (characters, not tokens)
const MAX_CONTENT_CHARS: usize = 2048;

/// 256-bit digest of normalized text; the cache key.
pub type ContentHash = [u8; 32];

/// Normalize text for hashing and embedding.
///
/// Returns `None` if nothing is left after trimming.
pub fn normalize_text(text: &str) -> Option<String> {
    let normalized = text
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    if normalized.is_empty() {
        return None;
    }

    if normalized.chars().count() <= MAX_CONTENT_CHARS {
        return Some(normalized);
    }

    Some(normalized.chars().take(MAX_CONTENT_CHARS).collect())
}

/// SHA-256 of already-normalized text.
pub fn hash_normalized(normalized: &str) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.finalize().into()
}

/// Content hash of arbitrary text, `None` for blank text.
pub fn content_hash(text: &str) -> Option<ContentHash> {
    normalize_text(text).map(|normalized| hash_normalized(&normalized))
}

/// Lowercase hex rendering of a content hash, for logs and file records.
pub fn hash_hex(hash: &ContentHash) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length. Returns `None` for a zero vector.
pub fn l2_normalize(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm = l2_norm(&v);
    if norm < f32::EPSILON || !norm.is_finite() {
        return None;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Some(v)
}

/// Average token-level vectors into one sentence vector.
///
/// Rows whose width differs from the first row are skipped.
pub fn mean_pool(tokens: &[Vec<f32>]) -> Option<Vec<f32>> {
    let width = tokens.first()?.len();
    if width == 0 {
        return None;
    }

    let mut sum = vec![0.0f32; width];
    let mut rows = 0usize;
    for token in tokens.iter().filter(|t| t.len() == width) {
        sum.iter_mut().zip(token).for_each(|(acc, x)| *acc += x);
        rows += 1;
    }

    sum.iter_mut().for_each(|x| *x /= rows as f32);
    Some(sum)
}
