//! Portable encodings for embedding vectors.
//!
//! Two forms exist:
//! - text: a JSON numeric array (`[0.1,-0.2,...]`), the authoritative form
//!   stored in the card table's text column and inlined in interchange
//!   documents
//! - native: a fixed-width blob of little-endian `f32` values, `4 * dims`
//!   bytes, for backends with a binary vector column and for `vectors.bin`

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed vector text: {0}")]
    MalformedText(#[from] serde_json::Error),

    #[error("vector contains a non-finite component at position {0}")]
    NonFinite(usize),

    #[error("native vector has {0} bytes, not a multiple of 4")]
    RaggedBlob(usize),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Encode a vector as its JSON array text form.
pub fn to_text(vector: &[f32]) -> Result<String, CodecError> {
    check_finite(vector)?;
    Ok(serde_json::to_string(vector)?)
}

/// Decode the JSON array text form. An empty or blank column means no vector.
pub fn from_text(text: &str) -> Result<Option<Vec<f32>>, CodecError> {
    let text = text.trim();
    if text.is_empty() || text == "null" {
        return Ok(None);
    }

    let vector: Vec<f32> = serde_json::from_str(text)?;
    check_finite(&vector)?;
    Ok(Some(vector))
}

/// Encode a vector as a little-endian `f32` blob.
pub fn to_native(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian `f32` blob, checking it has exactly `dimensions` lanes.
pub fn from_native(blob: &[u8], dimensions: usize) -> Result<Vec<f32>, CodecError> {
    if blob.len() % 4 != 0 {
        return Err(CodecError::RaggedBlob(blob.len()));
    }
    if blob.len() / 4 != dimensions {
        return Err(CodecError::DimensionMismatch {
            expected: dimensions,
            got: blob.len() / 4,
        });
    }

    let vector: Vec<f32> = blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    check_finite(&vector)?;
    Ok(vector)
}

fn check_finite(vector: &[f32]) -> Result<(), CodecError> {
    match vector.iter().position(|v| !v.is_finite()) {
        Some(pos) => Err(CodecError::NonFinite(pos)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form_is_plain_json_array() {
        let text = to_text(&[0.5, -0.25, 1.0]).unwrap();
        assert_eq!(text, "[0.5,-0.25,1.0]");
        assert_eq!(from_text(&text).unwrap(), Some(vec![0.5, -0.25, 1.0]));
    }

    #[test]
    fn test_text_form_is_exact_for_f32() {
        let vector = vec![0.1f32, 1.0 / 3.0, -7.123_456_7e-5];
        let back = from_text(&to_text(&vector).unwrap()).unwrap().unwrap();
        assert_eq!(back, vector);
    }

    #[test]
    fn test_blank_text_means_absent() {
        assert_eq!(from_text("").unwrap(), None);
        assert_eq!(from_text("  ").unwrap(), None);
        assert_eq!(from_text("null").unwrap(), None);
    }

    #[test]
    fn test_malformed_text_rejected() {
        assert!(matches!(from_text("[1.0, oops]"), Err(CodecError::MalformedText(_))));
        assert!(matches!(from_text("{\"a\":1}"), Err(CodecError::MalformedText(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(to_text(&[1.0, f32::NAN]), Err(CodecError::NonFinite(1))));
    }

    #[test]
    fn test_native_form_is_fixed_width() {
        let blob = to_native(&[1.0, -2.5, 3.125]);
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[0..4], &1.0f32.to_le_bytes());
        assert_eq!(from_native(&blob, 3).unwrap(), vec![1.0, -2.5, 3.125]);
    }

    #[test]
    fn test_native_dimension_checked() {
        let blob = to_native(&[1.0, 2.0]);
        assert!(matches!(
            from_native(&blob, 3),
            Err(CodecError::DimensionMismatch { expected: 3, got: 2 })
        ));
        assert!(matches!(from_native(&blob[..7], 2), Err(CodecError::RaggedBlob(7))));
    }
}
